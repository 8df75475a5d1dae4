use crate::addon::ARCHIVE_FILE_NAME;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const HL2VR_DIR_NAME: &str = "Half-Life 2 VR";
pub const HL2_DIR_NAME: &str = "Half-Life 2";
pub const GAMEINFO_FILE_NAME: &str = "gameinfo.txt";

const STEAMAPPS: &str = "steamapps";
const COMMON: &str = "common";
const WORKSHOP_SEGMENTS: [&str; 3] = ["workshop", "content", crate::workshop::APP_ID];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameDir {
    Hlvr,
    EpisodicVr,
    Ep2Vr,
}

impl GameDir {
    pub const ALL: [GameDir; 3] = [GameDir::Hlvr, GameDir::EpisodicVr, GameDir::Ep2Vr];
    pub const EPISODES: [GameDir; 2] = [GameDir::EpisodicVr, GameDir::Ep2Vr];

    pub fn dir_name(self) -> &'static str {
        match self {
            GameDir::Hlvr => "hlvr",
            GameDir::EpisodicVr => "episodicvr",
            GameDir::Ep2Vr => "ep2vr",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GameDir::Hlvr => "Half-Life 2",
            GameDir::EpisodicVr => "Episode One",
            GameDir::Ep2Vr => "Episode Two",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("select the Half-Life 2 VR folder")]
    MissingHl2Vr,
    #[error("select the Half-Life 2 folder")]
    MissingHl2,
    #[error("wrong path selected for the Half-Life 2 VR folder: {0}")]
    WrongHl2VrFolder(PathBuf),
    #[error("wrong path selected for the Half-Life 2 folder: {0}")]
    WrongHl2Folder(PathBuf),
    #[error("gameinfo.txt not found at {0}, check file integrity")]
    GameInfoMissing(PathBuf),
    #[error("failed to find the workshop folder")]
    WorkshopMissing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installation {
    hl2vr_root: PathBuf,
    hl2_root: PathBuf,
    workshop_root: PathBuf,
}

impl Installation {
    pub fn discover(hl2vr_root: &Path, hl2_root: &Path) -> Result<Self, PathError> {
        let workshop_root = validate_paths(hl2vr_root, hl2_root)?;
        Ok(Self {
            hl2vr_root: hl2vr_root.to_path_buf(),
            hl2_root: hl2_root.to_path_buf(),
            workshop_root,
        })
    }

    #[cfg(test)]
    pub fn from_parts(hl2vr_root: PathBuf, hl2_root: PathBuf, workshop_root: PathBuf) -> Self {
        Self {
            hl2vr_root,
            hl2_root,
            workshop_root,
        }
    }

    pub fn hl2vr_root(&self) -> &Path {
        &self.hl2vr_root
    }

    pub fn hl2_root(&self) -> &Path {
        &self.hl2_root
    }

    pub fn workshop_root(&self) -> &Path {
        &self.workshop_root
    }

    pub fn game_dir(&self, game: GameDir) -> PathBuf {
        self.hl2vr_root.join(game.dir_name())
    }

    pub fn gameinfo_path(&self, game: GameDir) -> PathBuf {
        self.game_dir(game).join(GAMEINFO_FILE_NAME)
    }

    pub fn episode_gameinfos(&self) -> Vec<(GameDir, PathBuf)> {
        GameDir::EPISODES
            .into_iter()
            .map(|game| (game, self.gameinfo_path(game)))
            .filter(|(_, path)| path.is_file())
            .collect()
    }

    pub fn archive_path(&self, id: &str) -> String {
        self.workshop_root
            .join(id)
            .join(ARCHIVE_FILE_NAME)
            .to_string_lossy()
            .into_owned()
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split(['/', '\\']).collect()
}

fn separator_of(path: &str) -> &'static str {
    if path.contains('\\') && !path.contains('/') {
        "\\"
    } else {
        "/"
    }
}

fn last_segment(path: &Path) -> Option<String> {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches(['/', '\\']);
    segments(trimmed).last().map(|segment| segment.to_string())
}

pub fn locate_workshop_root(base: &Path) -> Option<PathBuf> {
    let text = base.to_string_lossy();
    let text = text.trim_end_matches(['/', '\\']);
    let sep = separator_of(text);
    let parts = segments(text);

    if let Some(idx) = parts
        .windows(2)
        .position(|pair| pair[0] == COMMON && pair[1] == HL2_DIR_NAME)
    {
        let mut out: Vec<&str> = parts[..idx].to_vec();
        out.extend(WORKSHOP_SEGMENTS);
        out.extend_from_slice(&parts[idx + 2..]);
        return Some(PathBuf::from(out.join(sep)));
    }

    let idx = parts.iter().position(|part| *part == STEAMAPPS)?;
    let mut out: Vec<&str> = parts[..=idx].to_vec();
    out.extend(WORKSHOP_SEGMENTS);
    Some(PathBuf::from(out.join(sep)))
}

pub fn validate_paths(hl2vr_root: &Path, hl2_root: &Path) -> Result<PathBuf, PathError> {
    if hl2vr_root.as_os_str().is_empty() {
        return Err(PathError::MissingHl2Vr);
    }
    if hl2_root.as_os_str().is_empty() {
        return Err(PathError::MissingHl2);
    }
    if last_segment(hl2vr_root).as_deref() != Some(HL2VR_DIR_NAME) {
        return Err(PathError::WrongHl2VrFolder(hl2vr_root.to_path_buf()));
    }
    if last_segment(hl2_root).as_deref() != Some(HL2_DIR_NAME) {
        return Err(PathError::WrongHl2Folder(hl2_root.to_path_buf()));
    }
    let gameinfo = hl2vr_root.join(GameDir::Hlvr.dir_name()).join(GAMEINFO_FILE_NAME);
    if !gameinfo.is_file() {
        return Err(PathError::GameInfoMissing(gameinfo));
    }
    match locate_workshop_root(hl2_root) {
        Some(root) if root.is_dir() => Ok(root),
        _ => Err(PathError::WorkshopMissing),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn workshop_root_replaces_common_segment() {
        assert_eq!(
            locate_workshop_root(Path::new("C:\\Steam\\steamapps\\common\\Half-Life 2")),
            Some(PathBuf::from("C:\\Steam\\steamapps\\workshop\\content\\220"))
        );
        assert_eq!(
            locate_workshop_root(Path::new("/home/u/.steam/steamapps/common/Half-Life 2/")),
            Some(PathBuf::from("/home/u/.steam/steamapps/workshop/content/220"))
        );
    }

    #[test]
    fn workshop_root_falls_back_to_steamapps() {
        assert_eq!(
            locate_workshop_root(Path::new("/games/steamapps/other/HL2")),
            Some(PathBuf::from("/games/steamapps/workshop/content/220"))
        );
        assert_eq!(locate_workshop_root(Path::new("/opt/hl2")), None);
    }

    fn fake_library() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let common = dir.path().join("steamapps").join("common");
        fs::create_dir_all(common.join(HL2VR_DIR_NAME).join("hlvr")).unwrap();
        fs::write(
            common.join(HL2VR_DIR_NAME).join("hlvr").join(GAMEINFO_FILE_NAME),
            "\"GameInfo\"\n{\n}\n",
        )
        .unwrap();
        fs::create_dir_all(common.join(HL2_DIR_NAME)).unwrap();
        fs::create_dir_all(dir.path().join("steamapps").join("workshop").join("content").join("220"))
            .unwrap();
        dir
    }

    #[test]
    fn validates_a_complete_library() {
        let library = fake_library();
        let common = library.path().join("steamapps").join("common");
        let install =
            Installation::discover(&common.join(HL2VR_DIR_NAME), &common.join(HL2_DIR_NAME)).unwrap();
        assert!(install.workshop_root().is_dir());
        assert!(install.archive_path("42").ends_with("workshop_dir.vpk"));
        assert!(install.episode_gameinfos().is_empty());
    }

    #[test]
    fn reports_each_path_problem() {
        let library = fake_library();
        let common = library.path().join("steamapps").join("common");
        let vr = common.join(HL2VR_DIR_NAME);
        let hl2 = common.join(HL2_DIR_NAME);

        assert_eq!(validate_paths(Path::new(""), &hl2), Err(PathError::MissingHl2Vr));
        assert_eq!(validate_paths(&vr, Path::new("")), Err(PathError::MissingHl2));
        assert!(matches!(
            validate_paths(&hl2, &hl2),
            Err(PathError::WrongHl2VrFolder(_))
        ));
        assert!(matches!(
            validate_paths(&vr, &vr),
            Err(PathError::WrongHl2Folder(_))
        ));

        fs::remove_file(vr.join("hlvr").join(GAMEINFO_FILE_NAME)).unwrap();
        assert!(matches!(
            validate_paths(&vr, &hl2),
            Err(PathError::GameInfoMissing(_))
        ));
    }

    #[test]
    fn missing_workshop_folder_is_reported() {
        let library = fake_library();
        fs::remove_dir_all(library.path().join("steamapps").join("workshop")).unwrap();
        let common = library.path().join("steamapps").join("common");
        assert_eq!(
            validate_paths(&common.join(HL2VR_DIR_NAME), &common.join(HL2_DIR_NAME)),
            Err(PathError::WorkshopMissing)
        );
    }
}
