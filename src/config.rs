use crate::storage::project_dirs;
use crate::timeline::TimelineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub sync_dir: Option<PathBuf>,
    pub chunk_years: u32,
    pub years_before: u32,
    pub years_after: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let timeline = TimelineSettings::default();
        Config {
            data_dir: None,
            sync_dir: None,
            chunk_years: timeline.chunk_years,
            years_before: timeline.years_before,
            years_after: timeline.years_after,
            log_level: "info".into(),
        }
    }
}

/// Upper bound for every year count in the config.
const MAX_TIMELINE_YEARS: u32 = 100;

impl Config {
    pub fn timeline(&self) -> TimelineSettings {
        TimelineSettings {
            chunk_years: self.chunk_years.clamp(1, MAX_TIMELINE_YEARS),
            years_before: self.years_before.min(MAX_TIMELINE_YEARS),
            years_after: self.years_after.min(MAX_TIMELINE_YEARS),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.yml"))
}

/// A missing file yields defaults; a file that does not parse is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file {:?} does not exist", path);
        }
        return Ok(Config::default());
    }
    let data = fs::read_to_string(&path).with_context(|| format!("reading {:?}", path))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config =
        serde_yaml::from_str(&data).with_context(|| format!("parsing config {:?}", path))?;
    Ok(config)
}
