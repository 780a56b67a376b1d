use crate::error::Result;
use crate::types::ConfigSnapshot;
use directories::BaseDirs;
use regex::Regex;
use std::path::PathBuf;

// Top-level `registry` only; `@scope:registry=` lines belong to other registries.
const KEY_LINE: &str = r"^(?P<head>[ \t]*registry[ \t]*=[ \t]*)(?P<value>.*?)(?P<eol>\r?\n?)$";

pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os("NPM_CONFIG_USERCONFIG").filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".npmrc"))
        .unwrap_or_else(|| PathBuf::from(".").join(".npmrc"))
}

/// npm lets the last assignment win, so that is the line we read and rewrite.
fn effective_line(lines: &[&str], key_re: &Regex) -> Option<usize> {
    lines.iter().rposition(|line| key_re.is_match(line))
}

pub fn extract_url(snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    let key_re = Regex::new(KEY_LINE)?;
    let lines: Vec<&str> = snapshot.content.split_inclusive('\n').collect();

    Ok(effective_line(&lines, &key_re)
        .and_then(|i| key_re.captures(lines[i]))
        .map(|caps| {
            caps["value"]
                .trim()
                .trim_matches(|c| c == '"' || c == '\'')
                .to_string()
        })
        .filter(|url| !url.is_empty()))
}

pub fn apply(snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let content = snapshot.map_or("", |s| s.content.as_str());
    let key_re = Regex::new(KEY_LINE)?;
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    let Some(idx) = effective_line(&lines, &key_re) else {
        let prefix = if content.is_empty() || content.ends_with('\n') {
            ""
        } else {
            "\n"
        };
        return Ok(format!("{}{}registry={}\n", content, prefix, url));
    };

    let mut out = String::with_capacity(content.len() + url.len());
    for (i, line) in lines.iter().enumerate() {
        match key_re.captures(line) {
            Some(caps) if i == idx => {
                out.push_str(&caps["head"]);
                out.push_str(url);
                out.push_str(&caps["eol"]);
            }
            _ => out.push_str(line),
        }
    }
    Ok(out)
}
