use crate::{
    addon::AddonRecord,
    error::GameInfoError,
    markers::{self, MarkerInstall, MarkerStatus},
    parser::{self, ParsedBlock},
    report::Reporter,
    writer,
};
use std::{
    collections::HashSet,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

// Lines keep their terminators so untouched lines are written back as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInfoDocument {
    path: PathBuf,
    lines: Vec<String>,
    newline: &'static str,
}

impl GameInfoDocument {
    pub fn load(path: &Path) -> Result<Self, GameInfoError> {
        let text = fs::read_to_string(path).map_err(|err| GameInfoError::io(path, err))?;
        Ok(Self::parse(path, &text))
    }

    pub fn parse(path: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: path.into(),
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
            newline: detect_newline(text),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    pub fn marker_status(&self) -> MarkerStatus {
        markers::status(&self.lines)
    }

    pub fn block(&self) -> Option<ParsedBlock> {
        parser::parse_block(&self.lines)
    }

    pub fn addons(&self) -> Vec<AddonRecord> {
        self.block().map(|block| block.records()).unwrap_or_default()
    }

    pub fn write_block(&mut self, records: &[AddonRecord]) -> Result<MarkerInstall, GameInfoError> {
        self.marker_status().ensure_writable()?;
        let mut lines = self.lines.clone();
        let install = markers::install(&mut lines, self.newline)?;
        let (_, span) = markers::locate(&lines);
        let span = span.ok_or(GameInfoError::Corrupted)?;
        self.lines = writer::replace_region(&lines, span, records, self.newline)?;
        Ok(install)
    }

    pub fn remove_ids(&mut self, ids: &HashSet<String>) -> Result<usize, GameInfoError> {
        self.marker_status().ensure_writable()?;
        let Some(block) = self.block() else {
            return Ok(0);
        };
        let (lines, removed) = writer::remove_parsed(&self.lines, &block, ids);
        self.lines = lines;
        Ok(removed)
    }

    pub fn save(&self) -> Result<(), GameInfoError> {
        write_atomic(&self.path, &self.to_text())
    }
}

pub fn read_addons(path: &Path, reporter: &dyn Reporter) -> Vec<AddonRecord> {
    let document = match GameInfoDocument::load(path) {
        Ok(document) => document,
        Err(err) => {
            reporter.warn(&format!("Could not read addons: {err}"));
            return Vec::new();
        }
    };
    match document.block() {
        Some(block) => block.records(),
        None => {
            reporter.warn(&format!(
                "{}: no addons block or SearchPaths section found",
                path.display()
            ));
            Vec::new()
        }
    }
}

pub fn detect_newline(text: &str) -> &'static str {
    match text.find('\n') {
        Some(idx) if idx > 0 && text.as_bytes()[idx - 1] == b'\r' => "\r\n",
        _ => "\n",
    }
}

pub fn write_atomic(path: &Path, contents: &str) -> Result<(), GameInfoError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| GameInfoError::io(path, std::io::ErrorKind::InvalidInput.into()))?;
    let mut temp_name = OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if temp_path.exists() {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }
    fs::write(&temp_path, contents).map_err(|err| GameInfoError::io(&temp_path, err))?;
    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(GameInfoError::io(path, err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{LogLevel, MemoryReporter};
    use pretty_assertions::assert_eq;

    const HEAD: &str = "\"GameInfo\"\r\n{\r\n\tgame \"Half-Life 2: VR\"\r\n\tFileSystem\r\n\t{\r\n\t\tSearchPaths\r\n\t\t{\r\n\t\t\tgame+mod\t\t\thlvr/custom/*\r\n";
    const TAIL: &str = "\t\t\t// mount VR files\r\n\t\t\tgame\t\t\t|gameinfo_path|.\r\n\t\t}\r\n\t}\r\n}";

    fn record(id: &str, title: &str) -> AddonRecord {
        AddonRecord::new(title, format!("D:\\Steam\\steamapps\\workshop\\content\\220\\{id}\\workshop_dir.vpk"))
    }

    #[test]
    fn detects_line_endings() {
        assert_eq!(detect_newline("a\r\nb"), "\r\n");
        assert_eq!(detect_newline("a\nb\r\n"), "\n");
        assert_eq!(detect_newline(""), "\n");
    }

    #[test]
    fn unmanaged_file_gets_markers_then_block() {
        let text = format!("{HEAD}{TAIL}");
        let mut doc = GameInfoDocument::parse("gameinfo.txt", &text);
        assert_eq!(doc.marker_status(), MarkerStatus::NoMarkers);

        let install = doc.write_block(&[record("1", "One")]).unwrap();
        assert!(matches!(install, MarkerInstall::Inserted { .. }));
        let expected = format!(
            "{HEAD}\t\t//mounted_addons_start\r\n\t\t// One\r\n\t\tgame+mod\t\t\"D:\\Steam\\steamapps\\workshop\\content\\220\\1\\workshop_dir.vpk\"\r\n\r\n\t\t//mounted_addons_end\r\n{TAIL}"
        );
        assert_eq!(doc.to_text(), expected);
        assert_eq!(doc.addons()[0].id, "1");
    }

    #[test]
    fn install_on_fresh_file_leaves_empty_adjacent_markers() {
        let mut doc = GameInfoDocument::parse("gameinfo.txt", &format!("{HEAD}{TAIL}"));
        let install = doc.write_block(&[]).unwrap();
        assert!(matches!(install, MarkerInstall::Inserted { .. }));
        let (status, span) = markers::locate(doc.lines());
        assert_eq!(status, MarkerStatus::Ok);
        let span = span.unwrap();
        assert_eq!(span.end, span.start + 1);
        assert!(doc.addons().is_empty());
    }

    #[test]
    fn one_sided_marker_refuses_every_write() {
        let text = format!("{HEAD}//mounted_addons_start\r\n{TAIL}");
        let mut doc = GameInfoDocument::parse("gameinfo.txt", &text);
        let err = doc.write_block(&[record("1", "One")]).unwrap_err();
        assert!(matches!(err, GameInfoError::MissingEndMarker));
        let ids: HashSet<String> = ["1".to_string()].into_iter().collect();
        assert!(doc.remove_ids(&ids).is_err());
        assert_eq!(doc.to_text(), text);
    }

    #[test]
    fn invalid_record_leaves_document_unchanged() {
        let text = format!("{HEAD}{TAIL}");
        let mut doc = GameInfoDocument::parse("gameinfo.txt", &text);
        let mut bad = record("1", "One");
        bad.path.push('"');
        assert!(doc.write_block(&[bad]).is_err());
        assert_eq!(doc.to_text(), text);
    }

    #[test]
    fn removes_from_search_paths_without_markers() {
        let text = format!(
            "{HEAD}\t\t\t// Legacy\r\n\t\t\tgame+mod\t\t\"C:\\w\\77\\workshop_dir.vpk\"\r\n\r\n{TAIL}"
        );
        let mut doc = GameInfoDocument::parse("gameinfo.txt", &text);
        let ids: HashSet<String> = ["77".to_string()].into_iter().collect();
        assert_eq!(doc.remove_ids(&ids).unwrap(), 1);
        assert_eq!(doc.to_text(), format!("{HEAD}{TAIL}"));
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gameinfo.txt");
        fs::write(&path, format!("{HEAD}{TAIL}")).unwrap();

        let mut doc = GameInfoDocument::load(&path).unwrap();
        doc.write_block(&[record("2", "Two"), record("3", "Three")]).unwrap();
        doc.save().unwrap();

        let reporter = MemoryReporter::new();
        let ids: Vec<String> = read_addons(&path, &reporter)
            .into_iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert!(!dir.path().join("gameinfo.txt.tmp").exists());
    }

    #[test]
    fn read_addons_fails_soft() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = MemoryReporter::new();
        let records = read_addons(&dir.path().join("missing.txt"), &reporter);
        assert!(records.is_empty());
        assert!(reporter.has_level(LogLevel::Warn));
    }
}
