//! Per-backend config formats. Each module owns one read/rewrite algorithm;
//! this module dispatches to them by `Backend`.

pub mod apt;
pub mod brew;
pub mod cargo;
pub mod docker;
pub mod go;
pub mod npm;
pub mod pip;

use crate::bench::Benchmark;
use crate::error::Result;
use crate::manager::{ConfigStore, Manager};
use crate::registry::Registry;
use crate::settings::Settings;
use crate::traits::SourceManager;
use crate::types::{Backend, ConfigSnapshot};

/// Parse only the field that designates the source URL.
pub fn extract_url(backend: Backend, snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    match backend {
        Backend::Pip => pip::extract_url(snapshot),
        Backend::Npm => npm::extract_url(snapshot),
        Backend::Docker => docker::extract_url(snapshot),
        Backend::Cargo => cargo::extract_url(snapshot),
        Backend::Apt => apt::extract_url(snapshot),
        Backend::Go => Ok(go::extract_url(&snapshot.content)),
        Backend::Brew => Ok(brew::extract_url(&snapshot.content)),
    }
}

/// New store content with the source pointed at `url`; everything else in
/// the snapshot is carried over unchanged.
pub fn apply(backend: Backend, snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let value = snapshot.map(|s| s.content.as_str());
    match backend {
        Backend::Pip => pip::apply(snapshot, url),
        Backend::Npm => npm::apply(snapshot, url),
        Backend::Docker => docker::apply(snapshot, url),
        Backend::Cargo => cargo::apply(snapshot, url),
        Backend::Apt => apt::apply(snapshot, url),
        Backend::Go => Ok(go::apply(value, url)),
        Backend::Brew => Ok(url.to_string()),
    }
}

/// Where the backend keeps its source setting on this machine.
pub fn store_for(backend: Backend) -> ConfigStore {
    match backend {
        Backend::Pip => ConfigStore::File(pip::config_path()),
        Backend::Npm => ConfigStore::File(npm::config_path()),
        Backend::Docker => ConfigStore::File(docker::config_path()),
        Backend::Cargo => ConfigStore::File(cargo::config_path()),
        Backend::Apt => ConfigStore::File(apt::config_path()),
        Backend::Go => ConfigStore::GoEnv,
        Backend::Brew => ConfigStore::ShellEnv(brew::API_DOMAIN),
    }
}

/// Key of the backend's list in the mirror catalog.
pub fn catalog_key(backend: Backend) -> String {
    match backend {
        Backend::Apt => format!("apt-{}", apt::detect_distro().unwrap_or("ubuntu")),
        other => other.name().to_string(),
    }
}

pub fn get_manager(name: &str, settings: &Settings) -> Result<Box<dyn SourceManager>> {
    let backend: Backend = name.parse()?;
    Ok(Box::new(Manager::new(
        backend,
        store_for(backend),
        Registry::global().candidates_for(&catalog_key(backend)),
        Benchmark::new(settings.timeout(), settings.progress),
    )))
}
