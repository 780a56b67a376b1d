use crate::bench::ProbeFailure;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    /// 现有配置无法解析: 只报告, 不自动修复
    #[error("cannot parse {origin}: {detail}")]
    ConfigParse { origin: String, detail: String },

    #[error("permission denied writing {}; re-run with sudo or as an administrator", path.display())]
    PermissionDenied { path: PathBuf },

    /// Only ever produced inside the benchmark engine for a single probe.
    #[error("{url}: {failure}")]
    Network { url: String, failure: ProbeFailure },

    #[error("no mirror answered within the timeout; check your network connection")]
    NoReachableMirror,

    #[error("no backup found for {}", path.display())]
    BackupMissing { path: PathBuf },

    #[error("failed to write {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} has no active entry served under {archive_path}", path.display())]
    NothingToRewrite { path: PathBuf, archive_path: String },

    #[error("unsupported tool '{name}'. Available: {available}")]
    UnknownTool { name: String, available: String },

    #[error("mirror '{name}' not found for {tool}. Use 'test' to see available list.")]
    UnknownMirror { tool: String, name: String },

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },

    #[error("IO operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl MirrorError {
    pub fn parse(origin: impl Into<String>, detail: impl ToString) -> Self {
        Self::ConfigParse {
            origin: origin.into(),
            detail: detail.to_string(),
        }
    }

    /// Classify an I/O error raised while mutating `path`.
    pub fn write(path: &Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            Self::WriteFailure {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Short name of the failure kind, used in exit messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } => "parse",
            Self::PermissionDenied { .. } => "permission",
            Self::Network { .. } => "network",
            Self::NoReachableMirror => "network-exhausted",
            Self::BackupMissing { .. } => "backup-missing",
            Self::WriteFailure { .. } => "write",
            Self::NothingToRewrite { .. } => "nothing-to-rewrite",
            Self::UnknownTool { .. } => "unknown-tool",
            Self::UnknownMirror { .. } => "unknown-mirror",
            Self::Command { .. } => "command",
            Self::Io(_) => "io",
            Self::Regex(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;
