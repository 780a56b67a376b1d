use crate::error::{MirrorError, Result};
use crate::types::ConfigSnapshot;
use directories::BaseDirs;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

const KEY: &str = "registry-mirrors";

pub fn config_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\docker\config\daemon.json")
    } else if cfg!(target_os = "macos") {
        // Docker Desktop for Mac user config
        BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".docker").join("daemon.json"))
            .unwrap_or_else(|| PathBuf::from(".").join(".docker").join("daemon.json"))
    } else {
        // Linux and others
        PathBuf::from("/etc/docker/daemon.json")
    }
}

fn parse(snapshot: &ConfigSnapshot) -> Result<Map<String, Value>> {
    // 空文件等同于 {}
    if snapshot.content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(&snapshot.content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MirrorError::parse(
            &snapshot.origin,
            "top level is not a JSON object",
        )),
        Err(e) => Err(MirrorError::parse(&snapshot.origin, e)),
    }
}

/// Indent unit of the existing document, so a rewrite doesn't reflow it.
fn detect_indent(content: &str) -> String {
    content
        .lines()
        .skip(1)
        .find_map(|line| {
            let indent: String = line.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
            (!indent.is_empty() && !line.trim().is_empty()).then_some(indent)
        })
        .unwrap_or_else(|| "  ".to_string())
}

pub fn extract_url(snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    let doc = parse(snapshot)?;
    // 取 registry-mirrors 数组的第一个元素
    Ok(doc
        .get(KEY)
        .and_then(Value::as_array)
        .and_then(|mirrors| mirrors.first())
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// Replace the mirror array and nothing else; key order is kept.
pub fn apply(snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let (mut doc, indent) = match snapshot {
        Some(s) => (parse(s)?, detect_indent(&s.content)),
        None => (Map::new(), "  ".to_string()),
    };

    // Docker 支持多个 mirror, 这里把选中的置为唯一一个
    doc.insert(KEY.to_string(), json!([url]));

    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(indent.as_bytes()));
    Value::Object(doc)
        .serialize(&mut ser)
        .map_err(|e| MirrorError::parse("daemon.json", e))?;
    buf.push(b'\n');

    String::from_utf8(buf).map_err(|e| MirrorError::parse("daemon.json", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(content: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            origin: "daemon.json".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_only_mirror_array_is_replaced() -> Result<()> {
        let before = r#"{"registry-mirrors": ["https://old"], "insecure-registries": ["x"], "log-driver": "json-file"}"#;
        assert_eq!(extract_url(&snap(before))?, Some("https://old".to_string()));

        let after = apply(Some(&snap(before)), "https://new")?;
        let value: Value = serde_json::from_str(&after).expect("valid json");
        assert_eq!(
            value,
            json!({"registry-mirrors": ["https://new"], "insecure-registries": ["x"], "log-driver": "json-file"})
        );

        // 原有键顺序保持不变
        let keys: Vec<_> = value.as_object().expect("object").keys().cloned().collect();
        assert_eq!(keys, ["registry-mirrors", "insecure-registries", "log-driver"]);
        Ok(())
    }

    #[test]
    fn test_nested_siblings_and_indent_survive() -> Result<()> {
        let before = "{\n    \"log-opts\": {\n        \"max-size\": \"10m\"\n    },\n    \"debug\": true\n}\n";
        let after = apply(Some(&snap(before)), "https://docker.m.daocloud.io")?;
        assert_eq!(
            after,
            "{\n    \"log-opts\": {\n        \"max-size\": \"10m\"\n    },\n    \"debug\": true,\n    \"registry-mirrors\": [\n        \"https://docker.m.daocloud.io\"\n    ]\n}\n"
        );
        assert_eq!(apply(Some(&snap(&after)), "https://docker.m.daocloud.io")?, after);
        Ok(())
    }

    #[test]
    fn test_absent_document_is_synthesized() -> Result<()> {
        let after = apply(None, "https://new")?;
        assert_eq!(after, "{\n  \"registry-mirrors\": [\n    \"https://new\"\n  ]\n}\n");
        assert_eq!(extract_url(&snap("  \n"))?, None);
        Ok(())
    }

    #[test]
    fn test_malformed_document_is_not_discarded() {
        for bad in ["{\"registry-mirrors\": [", "[\"https://old\"]"] {
            assert_eq!(apply(Some(&snap(bad)), "https://new").unwrap_err().kind(), "parse");
            assert_eq!(extract_url(&snap(bad)).unwrap_err().kind(), "parse");
        }
    }
}
