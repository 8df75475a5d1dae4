use crate::{addon::AddonRecord, markers};
use serde::Serialize;
use std::ops::Range;

const MOUNT_DIRECTIVE: &str = "game+mod";
const SEARCH_PATHS_KEY: &str = "SearchPaths";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    Blank,
    Marker,
    Title(&'a str),
    Mount(&'a str),
    Other,
}

pub fn classify(line: &str) -> LineKind<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if markers::is_marker(trimmed) {
        return LineKind::Marker;
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        let title = rest.trim();
        if title.is_empty() {
            return LineKind::Other;
        }
        return LineKind::Title(title);
    }
    if let Some(path) = mount_path(trimmed) {
        return LineKind::Mount(path);
    }
    LineKind::Other
}

fn mount_path(trimmed: &str) -> Option<&str> {
    let rest = trimmed.strip_prefix(MOUNT_DIRECTIVE)?;
    let unindented = rest.trim_start();
    if unindented.len() == rest.len() {
        return None;
    }
    let quoted = unindented.strip_prefix('"')?;
    let close = quoted.find('"')?;
    if close == 0 {
        return None;
    }
    Some(&quoted[..close])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockSource {
    Markers,
    SearchPaths,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddon {
    pub record: AddonRecord,
    pub title_line: usize,
    pub mount_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    pub source: BlockSource,
    pub region: Range<usize>,
    pub addons: Vec<ParsedAddon>,
}

impl ParsedBlock {
    pub fn records(&self) -> Vec<AddonRecord> {
        self.addons.iter().map(|addon| addon.record.clone()).collect()
    }
}

pub fn parse_region<S: AsRef<str>>(lines: &[S], region: Range<usize>) -> Vec<ParsedAddon> {
    let mut addons = Vec::new();
    let mut pending: Option<(&str, usize)> = None;
    let end = region.end.min(lines.len());

    for idx in region.start..end {
        match classify(lines[idx].as_ref()) {
            LineKind::Blank => {}
            LineKind::Title(title) => pending = Some((title, idx)),
            LineKind::Mount(path) => {
                if let Some((title, title_line)) = pending.take() {
                    let mut record = AddonRecord::new(title, path);
                    record.sequence = addons.len() + 1;
                    addons.push(ParsedAddon {
                        record,
                        title_line,
                        mount_line: idx,
                    });
                }
            }
            LineKind::Marker | LineKind::Other => pending = None,
        }
    }

    addons
}

pub fn parse_block<S: AsRef<str>>(lines: &[S]) -> Option<ParsedBlock> {
    let (status, span) = markers::locate(lines);
    if let (markers::MarkerStatus::Ok, Some(span)) = (status, span) {
        let region = span.inner();
        return Some(ParsedBlock {
            source: BlockSource::Markers,
            addons: parse_region(lines, region.clone()),
            region,
        });
    }

    let region = search_paths_region(lines)?;
    Some(ParsedBlock {
        source: BlockSource::SearchPaths,
        addons: parse_region(lines, region.clone()),
        region,
    })
}

pub fn search_paths_region<S: AsRef<str>>(lines: &[S]) -> Option<Range<usize>> {
    for (key_line, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        let Some(key_at) = line.find(SEARCH_PATHS_KEY) else {
            continue;
        };
        let Some(open_line) = find_opening_brace(lines, key_line, key_at + SEARCH_PATHS_KEY.len())
        else {
            continue;
        };
        if let Some(close_line) = find_closing_brace(lines, open_line) {
            return Some(open_line + 1..close_line);
        }
        return None;
    }
    None
}

fn find_opening_brace<S: AsRef<str>>(lines: &[S], key_line: usize, offset: usize) -> Option<usize> {
    let tail = &lines[key_line].as_ref()[offset..];
    for ch in tail.chars() {
        match ch {
            '{' => return Some(key_line),
            ch if ch.is_whitespace() => {}
            _ => return None,
        }
    }
    for (idx, line) in lines.iter().enumerate().skip(key_line + 1) {
        for ch in line.as_ref().chars() {
            match ch {
                '{' => return Some(idx),
                ch if ch.is_whitespace() => {}
                _ => return None,
            }
        }
    }
    None
}

fn find_closing_brace<S: AsRef<str>>(lines: &[S], open_line: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, line) in lines.iter().enumerate().skip(open_line) {
        let line = line.as_ref();
        let mut in_quote = false;
        let mut chars = line.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '"' => in_quote = !in_quote,
                '/' if !in_quote && chars.peek() == Some(&'/') => break,
                '{' if !in_quote => depth += 1,
                '}' if !in_quote => {
                    depth = depth.checked_sub(1)?;
                    if depth == 0 {
                        return Some(idx);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

pub fn parse_pairs(text: &str) -> Vec<AddonRecord> {
    let lines: Vec<&str> = text.lines().collect();
    parse_region(&lines, 0..lines.len())
        .into_iter()
        .map(|addon| addon.record)
        .collect()
}
