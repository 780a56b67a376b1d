use crate::bench::BenchmarkReport;
use crate::error::Result;
use crate::types::{Backend, Mirror, RestoreOutcome, SetOutcome};
use async_trait::async_trait;
use std::path::PathBuf;

/// SourceManager: 命令层唯一接触的接口, 每个 Backend 一个实例
#[async_trait]
pub trait SourceManager: Sync + Send {
    fn backend(&self) -> Backend;

    /// 工具名称 (如 "pip", "docker")
    fn name(&self) -> &'static str {
        self.backend().name()
    }

    /// 是否需要 Root 权限 (如 apt, docker 需要 sudo)
    fn requires_sudo(&self) -> bool {
        self.backend().requires_sudo()
    }

    /// 获取内置的推荐源列表
    fn list_candidates(&self) -> Vec<Mirror>;

    /// The file a write would touch, if the store is file-backed.
    async fn config_path(&self) -> Option<PathBuf>;

    /// 获取当前正在使用的源 URL; `None` 表示未配置 (官方默认源).
    /// Never touches the network.
    async fn current_url(&self) -> Result<Option<String>>;

    /// Probe the current source and every candidate.
    async fn benchmark(&self) -> Result<BenchmarkReport>;

    /// 应用新的镜像源: 先备份, 备份落盘后才写入新配置
    async fn set_source(&self, mirror: &Mirror) -> Result<SetOutcome>;

    /// 恢复到最近一次备份
    async fn restore(&self) -> Result<RestoreOutcome>;
}
