use crate::error::{MirrorError, Result};
use crate::types::ConfigSnapshot;
use directories::BaseDirs;
use std::path::PathBuf;
use toml_edit::{value, DocumentMut, Item, Table, Value};

/// Name given to the replacement source when none is configured yet.
const DEFAULT_SOURCE: &str = "mirror";

pub fn config_path() -> PathBuf {
    if let Some(home) = std::env::var_os("CARGO_HOME").filter(|p| !p.is_empty()) {
        return PathBuf::from(home).join("config.toml");
    }
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".cargo").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".").join(".cargo").join("config.toml"))
}

fn parse(snapshot: &ConfigSnapshot) -> Result<DocumentMut> {
    snapshot
        .content
        .parse::<DocumentMut>()
        .map_err(|e| MirrorError::parse(&snapshot.origin, e))
}

/// `[source.crates-io] replace-with`, if it names a source with a registry.
fn replacement(doc: &DocumentMut) -> Option<&str> {
    let source = doc.get("source")?;
    let name = source.get("crates-io")?.get("replace-with")?.as_str()?;
    source.get(name)?.get("registry")?.as_str().map(|_| name)
}

pub fn extract_url(snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    let doc = parse(snapshot)?;
    Ok(replacement(&doc)
        .and_then(|name| doc["source"][name]["registry"].as_str())
        .map(str::to_string))
}

/// Point crates-io at `url`, editing the TOML in place so comments,
/// ordering and unrelated tables are kept as written.
pub fn apply(snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let mut doc = match snapshot {
        Some(s) => parse(s)?,
        None => DocumentMut::new(),
    };
    let origin = snapshot.map_or("config.toml", |s| s.origin.as_str());

    // 已有 replace-with 时原地改写它指向的 registry, 否则新建 [source.mirror]
    let name = replacement(&doc).unwrap_or(DEFAULT_SOURCE).to_string();

    let source = child_table(origin, doc.as_table_mut(), "source", true)?;
    let crates_io = child_table(origin, source, "crates-io", false)?;
    set_string(crates_io, "replace-with", &name);
    let target = child_table(origin, source, &name, false)?;
    set_string(target, "registry", url);

    Ok(doc.to_string())
}

fn child_table<'a>(
    origin: &str,
    parent: &'a mut Table,
    key: &str,
    implicit: bool,
) -> Result<&'a mut Table> {
    let item = parent.entry(key).or_insert_with(|| {
        let mut table = Table::new();
        table.set_implicit(implicit);
        Item::Table(table)
    });
    item.as_table_mut()
        .ok_or_else(|| MirrorError::parse(origin, format!("`{}` is not a standard [table]", key)))
}

/// Overwrite a string value, keeping the whitespace and comment around it.
fn set_string(table: &mut Table, key: &str, new: &str) {
    match table.get_mut(key).and_then(Item::as_value_mut) {
        Some(existing) => {
            if existing.as_str() == Some(new) {
                return;
            }
            let decor = existing.decor().clone();
            *existing = Value::from(new);
            *existing.decor_mut() = decor;
        }
        None => {
            table.insert(key, value(new));
        }
    }
}
