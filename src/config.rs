use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub hl2vr_path: PathBuf,
    #[serde(default)]
    pub hl2_path: PathBuf,
    #[serde(default)]
    pub collection_url: String,
    #[serde(default)]
    pub single_addon_url: String,
    #[serde(default = "default_true")]
    pub check_addon_files: bool,
    #[serde(default = "default_true")]
    pub auto_check_maps: bool,
    #[serde(default = "default_true")]
    pub embed_into_episodes: bool,
    #[serde(default)]
    pub bundled_content_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hl2vr_path: PathBuf::new(),
            hl2_path: PathBuf::new(),
            collection_url: String::new(),
            single_addon_url: String::new(),
            check_addon_files: true,
            auto_check_maps: true,
            embed_into_episodes: true,
            bundled_content_dir: None,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        let path = base_data_dir()?.join(CONFIG_FILE_NAME);
        Self::load_or_create_at(&path)
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = base_data_dir()?.join(CONFIG_FILE_NAME);
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create app data dir")?;
        }
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "hl2vr" | "hl2vr_path" => self.hl2vr_path = PathBuf::from(value),
            "hl2" | "hl2_path" => self.hl2_path = PathBuf::from(value),
            "collection-url" | "collection_url" => self.collection_url = value.to_string(),
            "addon-url" | "single_addon_url" => self.single_addon_url = value.to_string(),
            "check-files" | "check_addon_files" => self.check_addon_files = parse_bool(value)?,
            "auto-maps" | "auto_check_maps" => self.auto_check_maps = parse_bool(value)?,
            "episodes" | "embed_into_episodes" => self.embed_into_episodes = parse_bool(value)?,
            "bundled-content" | "bundled_content_dir" => {
                self.bundled_content_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "log-level" | "log_level" => self.log_level = value.to_string(),
            other => bail!("unknown config key: {other}"),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => bail!("expected true or false, got {other}"),
    }
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("mountsmith"))
}
