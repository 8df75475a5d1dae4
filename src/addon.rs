use serde::{Deserialize, Serialize};

pub const UNKNOWN_ID: &str = "Unknown";
pub const MAP_PREFIX: &str = "MAP   |   ";
pub const ARCHIVE_EXTENSION: &str = ".vpk";
pub const ARCHIVE_FILE_NAME: &str = "workshop_dir.vpk";
pub const UNPACKED_DIR_NAME: &str = "workshop_dir";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonRecord {
    pub sequence: usize,
    pub title: String,
    pub id: String,
    pub path: String,
}

impl AddonRecord {
    pub fn new(title: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            sequence: 0,
            title: clean_title(&title.into()),
            id: extract_addon_id(&path),
            path,
        }
    }

    pub fn has_known_id(&self) -> bool {
        self.id != UNKNOWN_ID
    }

    pub fn is_map_titled(&self) -> bool {
        self.title.starts_with(MAP_PREFIX)
    }

    pub fn path_form(&self) -> PathForm {
        PathForm::of(&self.path)
    }

    pub fn archive_path(&self) -> String {
        archive_path_for(&self.path)
    }

    pub fn folder_path(&self) -> String {
        folder_path_for(&self.path)
    }

    pub fn mark_as_map(&mut self) -> bool {
        if self.is_map_titled() {
            return false;
        }
        self.title = format!("{MAP_PREFIX}{}", self.title);
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkshopItem {
    pub id: String,
    pub title: String,
}

impl WorkshopItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

impl From<&AddonRecord> for WorkshopItem {
    fn from(record: &AddonRecord) -> Self {
        Self::new(record.id.clone(), record.title.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathForm {
    Archive,
    Folder,
}

impl PathForm {
    pub fn of(path: &str) -> Self {
        if has_archive_extension(path) {
            PathForm::Archive
        } else {
            PathForm::Folder
        }
    }
}

pub fn extract_addon_id(path: &str) -> String {
    let segments: Vec<&str> = path.split(['/', '\\']).collect();

    for idx in 3..segments.len().saturating_sub(1) {
        if segments[idx - 3] == "workshop"
            && segments[idx - 2] == "content"
            && segments[idx - 1] == "220"
            && is_id_segment(segments[idx])
            && segments[idx + 1].starts_with(UNPACKED_DIR_NAME)
        {
            return segments[idx].to_string();
        }
    }

    for idx in 1..segments.len().saturating_sub(1) {
        if is_id_segment(segments[idx]) && segments[idx + 1].starts_with(UNPACKED_DIR_NAME) {
            return segments[idx].to_string();
        }
    }

    UNKNOWN_ID.to_string()
}

fn is_id_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|ch| ch.is_ascii_digit())
}

pub fn clean_title(title: &str) -> String {
    title
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn has_archive_extension(path: &str) -> bool {
    path.len() >= ARCHIVE_EXTENSION.len()
        && path.is_char_boundary(path.len() - ARCHIVE_EXTENSION.len())
        && path[path.len() - ARCHIVE_EXTENSION.len()..].eq_ignore_ascii_case(ARCHIVE_EXTENSION)
}

pub fn archive_path_for(path: &str) -> String {
    if has_archive_extension(path) {
        path.to_string()
    } else {
        format!("{path}{ARCHIVE_EXTENSION}")
    }
}

pub fn folder_path_for(path: &str) -> String {
    if has_archive_extension(path) {
        path[..path.len() - ARCHIVE_EXTENSION.len()].to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_id_from_workshop_content_path() {
        let path = "C:\\Steam\\steamapps\\workshop\\content\\220\\123456789\\workshop_dir.vpk";
        assert_eq!(extract_addon_id(path), "123456789");

        let path = "/home/u/.steam/steamapps/workshop/content/220/123456789/workshop_dir.vpk";
        assert_eq!(extract_addon_id(path), "123456789");
    }

    #[test]
    fn extracts_id_from_unpacked_folder_path() {
        let path = "/steam/workshop/content/220/42/workshop_dir";
        assert_eq!(extract_addon_id(path), "42");
    }

    #[test]
    fn prefers_canonical_shape_over_loose_match() {
        let path = "/mods/7/workshop_dir_backup/workshop/content/220/99/workshop_dir.vpk";
        assert_eq!(extract_addon_id(path), "99");
    }

    #[test]
    fn falls_back_to_loose_digits_before_file_name() {
        let path = "D:/mirror/555/workshop_dir.vpk";
        assert_eq!(extract_addon_id(path), "555");
    }

    #[test]
    fn unknown_when_no_numeric_segment() {
        assert_eq!(extract_addon_id("hlvr/custom/my_mod.vpk"), UNKNOWN_ID);
        assert_eq!(extract_addon_id("workshop_dir.vpk"), UNKNOWN_ID);
        assert_eq!(extract_addon_id("/a/12b/workshop_dir.vpk"), UNKNOWN_ID);
    }

    #[test]
    fn map_prefix_is_applied_once() {
        let mut record = AddonRecord::new("Station", "/w/220/1/workshop_dir");
        assert!(record.mark_as_map());
        assert!(!record.mark_as_map());
        assert_eq!(record.title, "MAP   |   Station");
    }

    #[test]
    fn derives_archive_and_folder_forms() {
        let record = AddonRecord::new("A", "/w/1/workshop_dir.vpk");
        assert_eq!(record.path_form(), PathForm::Archive);
        assert_eq!(record.folder_path(), "/w/1/workshop_dir");
        assert_eq!(record.archive_path(), "/w/1/workshop_dir.vpk");

        let record = AddonRecord::new("A", "/w/1/workshop_dir");
        assert_eq!(record.path_form(), PathForm::Folder);
        assert_eq!(record.archive_path(), "/w/1/workshop_dir.vpk");
    }

    #[test]
    fn clean_title_flattens_lines() {
        assert_eq!(clean_title("  Big\n  Map \r\n"), "Big Map");
    }
}
