use crate::error::GameInfoError;
use serde::Serialize;
use std::ops::Range;

pub const START_MARKER: &str = "//mounted_addons_start";
pub const END_MARKER: &str = "//mounted_addons_end";
pub const BLOCK_INDENT: &str = "\t\t";

const CUSTOM_MOUNT_NEEDLE: &str = "custom/*";
const MOUNT_DIRECTIVE: &str = "game+mod";
const VR_FILES_COMMENT: &str = "// mount VR files";
const SEARCH_PATHS_KEY: &str = "SearchPaths";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Ok,
    MissingStart,
    MissingEnd,
    Misordered,
    NoMarkers,
}

impl MarkerStatus {
    pub fn label(self) -> &'static str {
        match self {
            MarkerStatus::Ok => "ok",
            MarkerStatus::MissingStart => "missing_start",
            MarkerStatus::MissingEnd => "missing_end",
            MarkerStatus::Misordered => "misordered",
            MarkerStatus::NoMarkers => "no_markers",
        }
    }

    pub fn allows_write(self) -> bool {
        matches!(self, MarkerStatus::Ok | MarkerStatus::NoMarkers)
    }

    pub fn ensure_writable(self) -> Result<(), GameInfoError> {
        match self {
            MarkerStatus::Ok | MarkerStatus::NoMarkers => Ok(()),
            MarkerStatus::MissingStart => Err(GameInfoError::MissingStartMarker),
            MarkerStatus::MissingEnd => Err(GameInfoError::MissingEndMarker),
            MarkerStatus::Misordered => Err(GameInfoError::MisorderedMarkers),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarkerSpan {
    pub start: usize,
    pub end: usize,
}

impl MarkerSpan {
    pub fn inner(&self) -> Range<usize> {
        self.start + 1..self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertAnchor {
    BeforeVrFilesComment,
    AfterCustomMount,
    AfterSearchPathsBrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerInstall {
    AlreadyPresent,
    Inserted { line: usize, anchor: InsertAnchor },
}

pub fn is_start_marker(line: &str) -> bool {
    line.trim() == START_MARKER
}

pub fn is_end_marker(line: &str) -> bool {
    line.trim() == END_MARKER
}

pub fn is_marker(line: &str) -> bool {
    is_start_marker(line) || is_end_marker(line)
}

pub fn locate<S: AsRef<str>>(lines: &[S]) -> (MarkerStatus, Option<MarkerSpan>) {
    let start = lines.iter().position(|line| is_start_marker(line.as_ref()));
    let any_end = lines.iter().any(|line| is_end_marker(line.as_ref()));

    let Some(start) = start else {
        let status = if any_end {
            MarkerStatus::MissingStart
        } else {
            MarkerStatus::NoMarkers
        };
        return (status, None);
    };

    let end = lines
        .iter()
        .enumerate()
        .skip(start + 1)
        .find(|(_, line)| is_end_marker(line.as_ref()))
        .map(|(idx, _)| idx);

    match end {
        Some(end) => (MarkerStatus::Ok, Some(MarkerSpan { start, end })),
        None if any_end => (MarkerStatus::Misordered, None),
        None => (MarkerStatus::MissingEnd, None),
    }
}

pub fn status<S: AsRef<str>>(lines: &[S]) -> MarkerStatus {
    locate(lines).0
}

// Anchors in order: VR files comment, last custom mount, SearchPaths brace.
pub fn find_insertion_point<S: AsRef<str>>(lines: &[S]) -> Option<(usize, InsertAnchor)> {
    let mut found_custom = false;
    let mut last_custom = None;

    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if is_custom_mount(line) {
            found_custom = true;
            last_custom = Some(idx);
            continue;
        }
        if found_custom && line.contains(VR_FILES_COMMENT) {
            return Some((idx, InsertAnchor::BeforeVrFilesComment));
        }
    }

    if let Some(idx) = last_custom {
        return Some((idx + 1, InsertAnchor::AfterCustomMount));
    }

    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if !line.contains(SEARCH_PATHS_KEY) {
            continue;
        }
        if line.contains('{') {
            return Some((idx + 1, InsertAnchor::AfterSearchPathsBrace));
        }
        if lines
            .get(idx + 1)
            .is_some_and(|next| next.as_ref().contains('{'))
        {
            return Some((idx + 2, InsertAnchor::AfterSearchPathsBrace));
        }
    }

    None
}

pub fn install(lines: &mut Vec<String>, newline: &str) -> Result<MarkerInstall, GameInfoError> {
    match status(lines.as_slice()) {
        MarkerStatus::Ok => return Ok(MarkerInstall::AlreadyPresent),
        MarkerStatus::NoMarkers => {}
        other => {
            other.ensure_writable()?;
        }
    }

    let (line, anchor) = find_insertion_point(lines.as_slice()).ok_or(GameInfoError::Corrupted)?;
    if line == lines.len() {
        if let Some(last) = lines.last_mut() {
            if !last.ends_with('\n') {
                last.push_str(newline);
            }
        }
    }

    let marker_lines = [
        format!("{BLOCK_INDENT}{START_MARKER}{newline}"),
        format!("{BLOCK_INDENT}{END_MARKER}{newline}"),
    ];
    lines.splice(line..line, marker_lines);
    Ok(MarkerInstall::Inserted { line, anchor })
}

fn is_custom_mount(line: &str) -> bool {
    line.contains(CUSTOM_MOUNT_NEEDLE) && line.contains(MOUNT_DIRECTIVE)
}
