use crate::error::{MirrorError, Result};
use crate::types::ConfigSnapshot;
use directories::BaseDirs;
use regex::Regex;
use std::ops::Range;
use std::path::PathBuf;

const SECTION: &str = "global";
const KEY_LINE: &str = r"^(?P<head>index[-_]url[ \t]*[=:][ \t]*)(?P<value>.*?)(?P<eol>\r?\n?)$";

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("PIP_CONFIG_FILE").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    if let Some(base_dirs) = BaseDirs::new() {
        let config_dir = base_dirs.config_dir();
        if cfg!(target_os = "windows") {
            // Windows: %APPDATA%\pip\pip.ini
            config_dir.join("pip").join("pip.ini")
        } else {
            // Linux/macOS: ~/.config/pip/pip.conf (Standard XDG)
            config_dir.join("pip").join("pip.conf")
        }
    } else {
        PathBuf::from(".").join("pip.conf")
    }
}

/// Where the interesting lines of a pip.conf are.
#[derive(Debug, Default)]
struct Layout {
    global_header: Option<usize>,
    global_key: Option<usize>,
    /// First `index-url` in another section, e.g. `[install]`.
    other_key: Option<usize>,
}

impl Layout {
    /// The line pip actually reads the index from.
    fn effective_key(&self) -> Option<usize> {
        self.global_key.or(self.other_key)
    }
}

fn scan(origin: &str, lines: &[&str], key_re: &Regex) -> Result<Layout> {
    let mut layout = Layout::default();
    let mut section: Option<&str> = None;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim_end_matches(['\r', '\n']);
        let trimmed = line.trim();
        if trimmed.is_empty() || is_comment(trimmed) {
            continue;
        }
        // 缩进行是上一个值的续行
        if line.starts_with(char::is_whitespace) {
            continue;
        }

        if trimmed.starts_with('[') {
            let name = trimmed
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| {
                    MirrorError::parse(origin, format!("line {}: unterminated section header", i + 1))
                })?
                .trim();
            if name == SECTION && layout.global_header.is_none() {
                layout.global_header = Some(i);
            }
            section = Some(name);
            continue;
        }

        if !trimmed.contains(['=', ':']) {
            return Err(MirrorError::parse(
                origin,
                format!("line {}: expected `key = value`", i + 1),
            ));
        }
        let Some(current) = section else {
            return Err(MirrorError::parse(
                origin,
                format!("line {}: setting outside of any [section]", i + 1),
            ));
        };

        if key_re.is_match(raw) {
            if current == SECTION {
                if layout.global_key.is_some() {
                    return Err(MirrorError::parse(
                        origin,
                        format!("line {}: duplicate index-url in [global]", i + 1),
                    ));
                }
                layout.global_key = Some(i);
            } else if layout.other_key.is_none() {
                layout.other_key = Some(i);
            }
        }
    }

    Ok(layout)
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('#') || trimmed.starts_with(';')
}

/// Indented lines right after `idx`, which INI reads as part of its value.
fn continuation(lines: &[&str], idx: usize) -> Range<usize> {
    let start = idx + 1;
    let count = lines[start..]
        .iter()
        .take_while(|raw| {
            let line = raw.trim_end_matches(['\r', '\n']);
            line.starts_with([' ', '\t']) && !line.trim().is_empty()
        })
        .count();
    start..start + count
}

/// Lines holding the value of the key at `idx`: just the key line, unless
/// the value is empty there and moved onto continuation lines.
fn value_lines(lines: &[&str], idx: usize, key_re: &Regex) -> Range<usize> {
    let empty = key_re
        .captures(lines[idx])
        .is_some_and(|caps| caps["value"].trim().is_empty());
    if empty {
        idx..continuation(lines, idx).end
    } else {
        idx..idx + 1
    }
}

pub fn extract_url(snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    let key_re = Regex::new(KEY_LINE)?;
    let lines: Vec<&str> = snapshot.content.split_inclusive('\n').collect();
    let layout = scan(&snapshot.origin, &lines, &key_re)?;

    let Some(idx) = layout.effective_key() else {
        return Ok(None);
    };
    let url = lines[value_lines(&lines, idx, &key_re)]
        .iter()
        .enumerate()
        .find_map(|(offset, line)| {
            let value = match offset {
                0 => key_re.captures(line)?.name("value")?.as_str(),
                _ if is_comment(line) => return None,
                _ => *line,
            };
            Some(value.trim()).filter(|v| !v.is_empty())
        });
    Ok(url.map(str::to_string))
}

/// Rewrite the value of the effective `index-url`, or add one to `[global]`.
pub fn apply(snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let content = snapshot.map_or("", |s| s.content.as_str());
    let origin = snapshot.map_or("pip.conf", |s| s.origin.as_str());
    let key_re = Regex::new(KEY_LINE)?;
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let layout = scan(origin, &lines, &key_re)?;

    let mut out = String::with_capacity(content.len() + url.len() + 32);

    if let Some(idx) = layout.effective_key() {
        // 情况 A: 已存在 index-url, 只替换值 (连同值所在的续行)
        let span = value_lines(&lines, idx, &key_re);
        for (i, line) in lines.iter().enumerate() {
            match key_re.captures(line) {
                Some(caps) if i == idx => {
                    let head = &caps["head"];
                    if span.len() > 1 {
                        out.push_str(head.trim_end());
                        out.push(' ');
                    } else {
                        out.push_str(head);
                    }
                    out.push_str(url);
                    out.push_str(&caps["eol"]);
                }
                _ if span.contains(&i) && !is_comment(line) => {}
                _ => out.push_str(line),
            }
        }
    } else if let Some(idx) = layout.global_header {
        // 情况 B: 有 [global] 节但没有 key, 紧跟在节头后插入
        for (i, line) in lines.iter().enumerate() {
            out.push_str(line);
            if i == idx {
                let eol = if line.ends_with("\r\n") { "\r\n" } else { "\n" };
                if !line.ends_with('\n') {
                    out.push_str(eol);
                }
                out.push_str(&format!("index-url = {}{}", url, eol));
            }
        }
    } else {
        // 情况 C: 既没 key 也没 section, 追加
        out.push_str(content);
        if !content.is_empty() {
            if !content.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(&format!("[global]\nindex-url = {}\n", url));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(content: &str) -> ConfigSnapshot {
        ConfigSnapshot {
            origin: "pip.conf".to_string(),
            content: content.to_string(),
        }
    }

    const ALIYUN: &str = "https://mirrors.aliyun.com/pypi/simple/";

    #[test]
    fn test_absent_config_creates_global_section() -> Result<()> {
        let out = apply(None, ALIYUN)?;
        assert_eq!(out, format!("[global]\nindex-url = {}\n", ALIYUN));
        assert_eq!(extract_url(&snap(&out))?, Some(ALIYUN.to_string()));
        Ok(())
    }

    #[test]
    fn test_only_index_url_line_changes() -> Result<()> {
        let before = "\
# managed by hand
[global]
timeout = 60
index-url=https://pypi.org/simple
trusted-host = pypi.org
    files.pythonhosted.org

[install]
no-compile = true
";
        assert_eq!(extract_url(&snap(before))?, Some("https://pypi.org/simple".to_string()));

        let after = apply(Some(&snap(before)), ALIYUN)?;
        let old: Vec<_> = before.lines().collect();
        let new: Vec<_> = after.lines().collect();
        assert_eq!(old.len(), new.len());
        for (i, (o, n)) in old.iter().zip(&new).enumerate() {
            if i == 3 {
                assert_eq!(*n, format!("index-url={}", ALIYUN));
            } else {
                assert_eq!(o, n, "line {} changed", i);
            }
        }

        // 再次应用结果不变
        assert_eq!(apply(Some(&snap(&after)), ALIYUN)?, after);
        Ok(())
    }

    #[test]
    fn test_insert_after_global_header() -> Result<()> {
        let before = "[global]\r\ntimeout = 10\r\n";
        let after = apply(Some(&snap(before)), ALIYUN)?;
        assert_eq!(
            after,
            format!("[global]\r\nindex-url = {}\r\ntimeout = 10\r\n", ALIYUN)
        );
        Ok(())
    }

    #[test]
    fn test_append_when_no_global_section() -> Result<()> {
        let before = "[list]\nformat = columns";
        let after = apply(Some(&snap(before)), ALIYUN)?;
        assert_eq!(
            after,
            format!("[list]\nformat = columns\n\n[global]\nindex-url = {}\n", ALIYUN)
        );
        Ok(())
    }

    #[test]
    fn test_install_section_key_is_the_one_rewritten() -> Result<()> {
        let before = "[global]\ntimeout = 5\n[install]\nindex_url = https://old/simple\n";
        assert_eq!(extract_url(&snap(before))?, Some("https://old/simple".to_string()));

        let after = apply(Some(&snap(before)), ALIYUN)?;
        assert_eq!(
            after,
            format!("[global]\ntimeout = 5\n[install]\nindex_url = {}\n", ALIYUN)
        );
        Ok(())
    }

    #[test]
    fn test_value_on_continuation_line() -> Result<()> {
        let before = "[global]\nindex-url =\n    https://old.example/simple\ntimeout = 5\n";
        assert_eq!(
            extract_url(&snap(before))?,
            Some("https://old.example/simple".to_string())
        );

        let after = apply(Some(&snap(before)), "https://new.example/simple")?;
        assert_eq!(after, "[global]\nindex-url = https://new.example/simple\ntimeout = 5\n");
        assert_eq!(
            extract_url(&snap(&after))?,
            Some("https://new.example/simple".to_string())
        );
        assert_eq!(apply(Some(&snap(&after)), "https://new.example/simple")?, after);

        let before = "[global]\nindex-url =\n    ; moved here by hand\n    https://old.example/simple\n";
        assert_eq!(
            extract_url(&snap(before))?,
            Some("https://old.example/simple".to_string())
        );
        let after = apply(Some(&snap(before)), ALIYUN)?;
        assert_eq!(after, format!("[global]\nindex-url = {}\n    ; moved here by hand\n", ALIYUN));

        // 有值的 key 后面的缩进行属于别的用途, 保持原样
        let before = "[global]\nindex-url = https://old/simple\n    # note\n";
        let after = apply(Some(&snap(before)), ALIYUN)?;
        assert_eq!(after, format!("[global]\nindex-url = {}\n    # note\n", ALIYUN));
        Ok(())
    }

    #[test]
    fn test_malformed_config_is_reported() {
        for bad in [
            "[global\nindex-url = x\n",
            "index-url = https://pypi.org/simple\n",
            "[global]\njust some words\n",
            "[global]\nindex-url = a\nindex-url = b\n",
        ] {
            let err = apply(Some(&snap(bad)), ALIYUN).unwrap_err();
            assert_eq!(err.kind(), "parse", "{bad:?}");
            assert_eq!(extract_url(&snap(bad)).unwrap_err().kind(), "parse");
        }
    }
}
