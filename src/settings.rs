use crate::error::{MirrorError, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// cmirror's own settings, read from ~/.config/cmirror/config.toml.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// 单个测速请求的超时 (秒)
    pub timeout_secs: u64,
    /// Draw the progress bar while benchmarking.
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: 3,
            progress: true,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        match ProjectDirs::from("", "", "cmirror") {
            Some(dirs) => Self::load_from(&dirs.config_dir().join("config.toml")),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "loading settings");
        toml::from_str(&content).map_err(|e| MirrorError::parse(path.display().to_string(), e))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}
