use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameInfoError {
    #[error(
        "missing start marker of addons block: add //mounted_addons_start before the addons list"
    )]
    MissingStartMarker,
    #[error("missing end marker of addons block: add //mounted_addons_end after the addons list")]
    MissingEndMarker,
    #[error("addons block markers are out of order: //mounted_addons_end appears before //mounted_addons_start")]
    MisorderedMarkers,
    #[error("gameinfo.txt is corrupted, addons cannot be mounted")]
    Corrupted,
    #[error("addon {title:?} cannot be written: {reason}")]
    InvalidRecord { title: String, reason: &'static str },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GameInfoError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GameInfoError::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extraction cancelled")]
    Cancelled,
    #[error("archive not found: {0}")]
    ArchiveMissing(PathBuf),
    #[error("archive is empty: {0}")]
    EmptyArchive(PathBuf),
    #[error("error extracting {entry}: {message}")]
    Entry { entry: String, message: String },
    #[error("error extracting map: {0}")]
    Failed(String),
}
