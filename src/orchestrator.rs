use crate::bench::BenchmarkReport;
use crate::error::{MirrorError, Result};
use crate::traits::SourceManager;
use crate::types::{Mirror, RestoreOutcome, SetOutcome};
use futures::future::join_all;
use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

/// "Can this process write `path`?"
pub trait WriteAccess: Send + Sync {
    fn can_write(&self, path: &Path) -> bool;
}

/// Asks the filesystem: open an existing file for append, or create (and
/// remove) a probe file in the nearest existing ancestor directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsWriteAccess;

impl WriteAccess for FsWriteAccess {
    fn can_write(&self, path: &Path) -> bool {
        if path.exists() {
            return OpenOptions::new().append(true).open(path).is_ok();
        }
        let Some(dir) = path.ancestors().skip(1).find(|p| p.is_dir()) else {
            return false;
        };
        let probe = dir.join(format!(".cmirror-write-test-{}", std::process::id()));
        match OpenOptions::new().write(true).create_new(true).open(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    Official,
    /// `label` is the catalog name when the URL is a known mirror.
    Custom { url: String, label: Option<String> },
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Official => f.write_str("Official"),
            SourceStatus::Custom { label: Some(label), .. } => write!(f, "Custom: {}", label),
            SourceStatus::Custom { url, label: None } => write!(f, "Custom: {}", url),
        }
    }
}

/// Which mirror `use` should switch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Named(String),
    Fastest,
}

#[derive(Debug)]
pub struct Applied {
    pub mirror: Mirror,
    /// Present when the target was picked by benchmarking.
    pub report: Option<BenchmarkReport>,
    pub outcome: SetOutcome,
}

/// Runs status / benchmark / apply / restore against source managers.
pub struct Orchestrator<A = FsWriteAccess> {
    access: A,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(FsWriteAccess)
    }
}

impl<A: WriteAccess> Orchestrator<A> {
    pub fn new(access: A) -> Self {
        Self { access }
    }

    /// Status of every manager, concurrently. One backend's failure is
    /// reported in its own slot and does not affect the others.
    pub async fn status<'a>(
        &self,
        managers: &'a [Box<dyn SourceManager>],
    ) -> Vec<(&'a dyn SourceManager, Result<SourceStatus>)> {
        let tasks = managers.iter().map(|manager| async move {
            let status = status_of(manager.as_ref()).await;
            (manager.as_ref(), status)
        });
        join_all(tasks).await
    }

    pub async fn benchmark(&self, manager: &dyn SourceManager) -> Result<BenchmarkReport> {
        manager.benchmark().await
    }

    /// Resolve the target, check privilege, then back up and write.
    pub async fn apply(&self, manager: &dyn SourceManager, target: &Target) -> Result<Applied> {
        // 权限检查必须在测速和备份之前
        self.ensure_writable(manager).await?;

        let (mirror, report) = match target {
            Target::Named(name) => {
                let mirror = manager
                    .list_candidates()
                    .into_iter()
                    .find(|m| m.name.eq_ignore_ascii_case(name))
                    .ok_or_else(|| MirrorError::UnknownMirror {
                        tool: manager.name().to_string(),
                        name: name.clone(),
                    })?;
                (mirror, None)
            }
            Target::Fastest => {
                let report = manager.benchmark().await?;
                let best = report
                    .fastest()
                    .map(|r| r.mirror.clone())
                    .ok_or(MirrorError::NoReachableMirror)?;
                (best, Some(report))
            }
        };

        debug!(tool = manager.name(), mirror = %mirror.name, "applying");
        let outcome = manager.set_source(&mirror).await?;
        Ok(Applied {
            mirror,
            report,
            outcome,
        })
    }

    pub async fn restore(&self, manager: &dyn SourceManager) -> Result<RestoreOutcome> {
        self.ensure_writable(manager).await?;
        manager.restore().await
    }

    async fn ensure_writable(&self, manager: &dyn SourceManager) -> Result<()> {
        if !manager.requires_sudo() {
            return Ok(());
        }
        match manager.config_path().await {
            Some(path) if !self.access.can_write(&path) => {
                Err(MirrorError::PermissionDenied { path })
            }
            _ => Ok(()),
        }
    }
}

async fn status_of(manager: &dyn SourceManager) -> Result<SourceStatus> {
    Ok(match manager.current_url().await? {
        None => SourceStatus::Official,
        Some(url) => {
            let label = manager
                .list_candidates()
                .into_iter()
                .find(|m| m.matches(&url))
                .map(|m| m.name);
            SourceStatus::Custom { url, label }
        }
    })
}
