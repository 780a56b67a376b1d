use crate::error::{MirrorError, Result};
use crate::types::Mirror;
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

// Include the JSON file at compile time
const MIRRORS_JSON: &str = include_str!("../assets/mirrors.json");

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Named candidate mirrors per catalog key (`pip`, `apt-ubuntu`, ...).
#[derive(Debug, Clone, Default)]
pub struct Registry {
    mirrors: HashMap<String, Vec<Mirror>>,
}

impl Registry {
    pub fn from_json(origin: &str, json: &str) -> Result<Self> {
        let mirrors = serde_json::from_str(json).map_err(|e| MirrorError::parse(origin, e))?;
        Ok(Self { mirrors })
    }

    pub fn builtin() -> Self {
        Self::from_json("assets/mirrors.json", MIRRORS_JSON)
            .expect("assets/mirrors.json is embedded at compile time and must parse")
    }

    /// The process-wide catalog, loaded on first use.
    /// Strategy:
    /// 1. ~/.config/cmirror/mirrors.json replaces the built-in list if valid
    /// 2. Fallback to built-in assets/mirrors.json
    pub fn global() -> &'static Registry {
        REGISTRY.get_or_init(|| {
            ProjectDirs::from("", "", "cmirror")
                .and_then(|dirs| Self::load_user(&dirs.config_dir().join("mirrors.json")))
                .unwrap_or_else(Self::builtin)
        })
    }

    fn load_user(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match Self::from_json(&path.display().to_string(), &content) {
            Ok(registry) => {
                info!(path = %path.display(), "loaded mirrors from local config");
                Some(registry)
            }
            Err(e) => {
                warn!("ignoring user mirror list: {}", e);
                None
            }
        }
    }

    /// Candidates in catalog order; unknown keys yield an empty list.
    pub fn candidates_for(&self, key: &str) -> Vec<Mirror> {
        self.mirrors.get(key).cloned().unwrap_or_default()
    }
}
