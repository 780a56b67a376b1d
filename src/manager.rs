use crate::backup::{self, BackupOutcome};
use crate::bench::{Benchmark, BenchmarkReport};
use crate::error::{MirrorError, Result};
use crate::sources::{self, brew, go};
use crate::traits::SourceManager;
use crate::types::{Backend, ConfigSnapshot, Mirror, RestoreOutcome, SetOutcome};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Where a backend keeps its source setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigStore {
    /// A config file edited in place.
    File(PathBuf),
    /// `go env GOPROXY`, persisted by `go env -w` into the GOENV file.
    GoEnv,
    /// An environment variable of the user's shell.
    ShellEnv(&'static str),
}

/// One backend's config store, candidate list and prober behind the
/// `SourceManager` contract.
pub struct Manager {
    backend: Backend,
    store: ConfigStore,
    candidates: Vec<Mirror>,
    bench: Benchmark,
}

impl Manager {
    pub fn new(backend: Backend, store: ConfigStore, candidates: Vec<Mirror>, bench: Benchmark) -> Self {
        Self {
            backend,
            store,
            candidates,
            bench,
        }
    }

    /// Raw store content; `None` when nothing is configured.
    pub async fn read_current(&self) -> Result<Option<ConfigSnapshot>> {
        match &self.store {
            ConfigStore::File(path) => match fs::read_to_string(path).await {
                Ok(content) => Ok(Some(ConfigSnapshot {
                    origin: path.display().to_string(),
                    content,
                })),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            ConfigStore::GoEnv => match go_command(&["env", go::VARIABLE]).await {
                // go env 在未设置时也会打印内置默认值
                Ok(value) if value.is_empty() || value == go::DEFAULT => Ok(None),
                Ok(content) => Ok(Some(ConfigSnapshot {
                    origin: format!("go env {}", go::VARIABLE),
                    content,
                })),
                Err(e) => {
                    debug!("treating GOPROXY as unset: {}", e);
                    Ok(None)
                }
            },
            ConfigStore::ShellEnv(var) => Ok(std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|content| ConfigSnapshot {
                    origin: format!("${}", var),
                    content,
                })),
        }
    }

    async fn restore_latest(&self, path: &Path) -> Result<RestoreOutcome> {
        let record = backup::latest(path)
            .await?
            .ok_or_else(|| MirrorError::BackupMissing {
                path: path.to_path_buf(),
            })?;
        backup::restore(&record).await?;
        Ok(RestoreOutcome::Restored(record))
    }
}

#[async_trait]
impl SourceManager for Manager {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn list_candidates(&self) -> Vec<Mirror> {
        self.candidates.clone()
    }

    async fn config_path(&self) -> Option<PathBuf> {
        match &self.store {
            ConfigStore::File(path) => Some(path.clone()),
            ConfigStore::GoEnv => go_env_file().await,
            ConfigStore::ShellEnv(_) => None,
        }
    }

    async fn current_url(&self) -> Result<Option<String>> {
        match self.read_current().await? {
            Some(snapshot) => sources::extract_url(self.backend, &snapshot),
            None => Ok(None),
        }
    }

    async fn benchmark(&self) -> Result<BenchmarkReport> {
        // 未配置时把 "Official" 视为当前源
        let current = match self.current_url().await? {
            Some(url) => Some(url),
            None => self
                .candidates
                .iter()
                .find(|m| m.name.eq_ignore_ascii_case("Official"))
                .map(|m| m.url.clone()),
        };
        Ok(self
            .bench
            .probe_all(self.backend, current.as_deref(), self.candidates.clone())
            .await)
    }

    async fn set_source(&self, mirror: &Mirror) -> Result<SetOutcome> {
        let snapshot = self.read_current().await?;
        // 先算出新内容: 解析失败时既不备份也不写
        let new_content = sources::apply(self.backend, snapshot.as_ref(), &mirror.url)?;
        if snapshot.as_ref().is_some_and(|s| s.content == new_content) {
            info!(backend = %self.backend, mirror = %mirror.name, "already configured");
            return Ok(SetOutcome::Unchanged);
        }

        match &self.store {
            ConfigStore::File(path) => {
                let backup = backup::snapshot(path).await?;
                if let Err(e) = backup::replace_file(path, new_content.as_bytes()).await {
                    if let BackupOutcome::Created(record) = &backup {
                        warn!(
                            backup = %record.backup_path.display(),
                            "write failed; original left as backed up"
                        );
                    }
                    return Err(e);
                }
                info!(backend = %self.backend, path = %path.display(), "source updated");
                Ok(SetOutcome::Written(backup))
            }
            ConfigStore::GoEnv => {
                let backup = match go_env_file().await {
                    Some(path) => backup::snapshot(&path).await?,
                    None => BackupOutcome::NothingToBackUp,
                };
                let assignment = format!("{}={}", go::VARIABLE, new_content);
                go_command(&["env", "-w", &assignment]).await?;
                Ok(SetOutcome::Written(backup))
            }
            ConfigStore::ShellEnv(_) => Ok(SetOutcome::Manual(brew::exports(&mirror.url))),
        }
    }

    async fn restore(&self) -> Result<RestoreOutcome> {
        match &self.store {
            ConfigStore::File(path) => self.restore_latest(path).await,
            ConfigStore::GoEnv => match go_env_file().await {
                Some(path) => self.restore_latest(&path).await,
                None => Err(MirrorError::BackupMissing {
                    path: PathBuf::from("$GOENV"),
                }),
            },
            ConfigStore::ShellEnv(_) => Ok(RestoreOutcome::Manual(brew::unsets())),
        }
    }
}

async fn go_command(args: &[&str]) -> Result<String> {
    let command = format!("go {}", args.join(" "));
    let output = Command::new("go")
        .args(args)
        .output()
        .await
        .map_err(|e| MirrorError::Command {
            command: command.clone(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(MirrorError::Command {
            command,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The file `go env -w` writes to (e.g. ~/.config/go/env).
async fn go_env_file() -> Option<PathBuf> {
    match go_command(&["env", "GOENV"]).await {
        Ok(path) if !path.is_empty() && path != "off" => Some(PathBuf::from(path)),
        _ => None,
    }
}
