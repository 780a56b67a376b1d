use crate::backup::{BackupOutcome, BackupRecord};
use crate::error::MirrorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 镜像源定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String, // 例如: "Aliyun"
    pub url: String,  // 例如: "https://mirrors.aliyun.com/pypi/simple/"
}

impl Mirror {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    /// Whether `url` designates the same endpoint as this mirror.
    pub fn matches(&self, url: &str) -> bool {
        normalize_url(&self.url) == normalize_url(url)
    }
}

/// Comparison form of a source URL: cargo's `sparse+`/`git+` prefixes and
/// trailing slashes do not change the endpoint.
pub fn normalize_url(url: &str) -> &str {
    url.trim()
        .trim_start_matches("sparse+")
        .trim_start_matches("git+")
        .trim_end_matches('/')
}

/// The package/source managers cmirror knows how to rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Pip,
    Npm,
    Docker,
    Go,
    Cargo,
    Brew,
    Apt,
}

impl Backend {
    pub const ALL: [Backend; 7] = [
        Backend::Pip,
        Backend::Npm,
        Backend::Docker,
        Backend::Go,
        Backend::Cargo,
        Backend::Brew,
        Backend::Apt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Pip => "pip",
            Backend::Npm => "npm",
            Backend::Docker => "docker",
            Backend::Go => "go",
            Backend::Cargo => "cargo",
            Backend::Brew => "brew",
            Backend::Apt => "apt",
        }
    }

    /// 是否需要 Root 权限 (apt, docker 写系统目录)
    pub fn requires_sudo(self) -> bool {
        matches!(self, Backend::Apt | Backend::Docker)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Backend::ALL
            .into_iter()
            .find(|b| b.name() == wanted)
            .ok_or_else(|| MirrorError::UnknownTool {
                name: s.to_string(),
                available: Backend::ALL.map(Backend::name).join(", "),
            })
    }
}

/// Raw state of a backend's config store at read time.
/// `None` at the call sites means the store is absent (official source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Where the content came from (a path, or e.g. `go env GOPROXY`).
    pub origin: String,
    pub content: String,
}

/// What `set_source` ended up doing.
#[derive(Debug)]
pub enum SetOutcome {
    /// New content is durably written; the backup (if any) was taken first.
    Written(BackupOutcome),
    /// The store already pointed at the requested mirror.
    Unchanged,
    /// The store lives outside this process; the user has to run these.
    Manual(Vec<String>),
}

#[derive(Debug)]
pub enum RestoreOutcome {
    Restored(BackupRecord),
    Manual(Vec<String>),
}
