//! apt source lists: one-line `sources.list` entries and deb822 `.sources`
//! stanzas.
//!
//! The file is never regenerated. An entry is rewritten only when its
//! archive path equals the target mirror's path (`/ubuntu/`, `/debian/`);
//! then only the host changes and scheme, path, suite, components and
//! `[options]` stay byte-identical. Third-party repositories, `ports`,
//! commented-out lines, deb822 stanzas marked `Enabled: no` and anything
//! unrecognised pass through verbatim.

use crate::error::{MirrorError, Result};
use crate::types::ConfigSnapshot;
use regex::{Captures, Regex};
use reqwest::Url;
use std::path::{Path, PathBuf};

const LEGACY_LIST: &str = "/etc/apt/sources.list";
const DEB822_LISTS: [&str; 2] = [
    "/etc/apt/sources.list.d/ubuntu.sources",
    "/etc/apt/sources.list.d/debian.sources",
];

// deb [arch=amd64] http://archive.ubuntu.com/ubuntu/ jammy main restricted
const ONE_LINE: &str = r"^(?P<head>[ \t]*deb(?:-src)?[ \t]+(?:\[[^\]]*\][ \t]+)?)(?P<uri>\S+)(?P<tail>[ \t]+\S.*?)(?P<eol>\r?\n?)$";
// URIs: http://archive.ubuntu.com/ubuntu/ http://security.ubuntu.com/ubuntu/
const DEB822_URIS: &str = r"^(?P<head>(?i:URIs):[ \t]*)(?P<uris>.*?)(?P<eol>\r?\n?)$";
const DEB822_ENABLED: &str = r"^(?i:Enabled):[ \t]*(?P<value>\S*)";
const URI: &str = r"^(?P<scheme>[A-Za-z][A-Za-z0-9+.-]*)://(?P<host>[^/\s]+)(?P<path>/\S*)?$";

/// Pick the list file that actually carries the distribution's entries:
/// newer releases keep them in a deb822 file and leave sources.list empty.
pub fn config_path() -> PathBuf {
    let patterns = Patterns::new().ok();
    DEB822_LISTS
        .iter()
        .map(Path::new)
        .find(|path| {
            std::fs::read_to_string(path).is_ok_and(|content| {
                patterns.as_ref().is_some_and(|p| {
                    p.active_lines(&content)
                        .any(|l| !p.entry_uris(l).is_empty())
                })
            })
        })
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(LEGACY_LIST))
}

/// `ubuntu` or `debian`, from /etc/os-release (then sources.list content).
pub fn detect_distro() -> Option<&'static str> {
    let from = |content: &str| {
        let lower = content.to_lowercase();
        if lower.contains("id=ubuntu") || lower.contains("ubuntu.com") {
            Some("ubuntu")
        } else if lower.contains("id=debian") || lower.contains("debian.org") {
            Some("debian")
        } else {
            None
        }
    };
    std::fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|c| from(&c))
        .or_else(|| std::fs::read_to_string(LEGACY_LIST).ok().and_then(|c| from(&c)))
}

struct Patterns {
    one_line: Regex,
    uris: Regex,
    enabled: Regex,
    uri: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        Ok(Self {
            one_line: Regex::new(ONE_LINE)?,
            uris: Regex::new(DEB822_URIS)?,
            enabled: Regex::new(DEB822_ENABLED)?,
            uri: Regex::new(URI)?,
        })
    }

    /// Each line of `content`, flagged when it belongs to a deb822 stanza
    /// (blank-line separated) that says `Enabled: no`.
    fn classify<'a>(&self, content: &'a str) -> Vec<(&'a str, bool)> {
        let mut out: Vec<(&str, bool)> = Vec::new();
        let mut stanza_start = 0;
        let mut disabled = false;
        for line in content.split_inclusive('\n') {
            if line.trim().is_empty() {
                out.push((line, false));
                stanza_start = out.len();
                disabled = false;
                continue;
            }
            let marks_disabled = self
                .enabled
                .captures(line)
                .is_some_and(|caps| caps["value"].eq_ignore_ascii_case("no"));
            if marks_disabled && !disabled {
                // Enabled 可以写在 URIs 之后, 回头标记整个 stanza
                disabled = true;
                for entry in &mut out[stanza_start..] {
                    entry.1 = true;
                }
            }
            out.push((line, disabled));
        }
        out
    }

    fn active_lines<'a>(&self, content: &'a str) -> impl Iterator<Item = &'a str> {
        self.classify(content)
            .into_iter()
            .filter(|(_, disabled)| !disabled)
            .map(|(line, _)| line)
    }

    /// URIs of an active entry line, in order.
    fn entry_uris<'a>(&self, line: &'a str) -> Vec<&'a str> {
        if let Some(caps) = self.one_line.captures(line) {
            let uri = caps.name("uri").map_or("", |m| m.as_str());
            return self.uri.is_match(uri).then_some(uri).into_iter().collect();
        }
        if let Some(caps) = self.uris.captures(line) {
            if let Some(uris) = caps.name("uris") {
                return uris
                    .as_str()
                    .split_whitespace()
                    .filter(|u| self.uri.is_match(u))
                    .collect();
            }
        }
        Vec::new()
    }
}

/// Host and archive path a mirror URL contributes to a rewrite.
struct Target {
    authority: String,
    archive_path: String,
}

impl Target {
    fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| MirrorError::parse(url, e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| MirrorError::parse(url, "mirror URL has no host"))?;
        let authority = match parsed.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Ok(Self {
            authority,
            archive_path: parsed.path().trim_matches('/').to_string(),
        })
    }

    /// The URI with its host swapped, if it serves this archive path.
    fn rewrite(&self, uri: &Captures<'_>) -> Option<String> {
        let path = uri.name("path").map_or("", |m| m.as_str());
        if path.trim_matches('/') != self.archive_path {
            return None;
        }
        Some(format!("{}://{}{}", &uri["scheme"], self.authority, path))
    }
}

pub fn extract_url(snapshot: &ConfigSnapshot) -> Result<Option<String>> {
    let patterns = Patterns::new()?;
    // 取第一条有效条目
    Ok(patterns
        .active_lines(&snapshot.content)
        .find_map(|line| patterns.entry_uris(line).first().map(|u| u.to_string())))
}

pub fn apply(snapshot: Option<&ConfigSnapshot>, url: &str) -> Result<String> {
    let target = Target::parse(url)?;
    let Some(snapshot) = snapshot else {
        // 没有 codename 无法凭空生成条目
        return Err(MirrorError::NothingToRewrite {
            path: PathBuf::from(LEGACY_LIST),
            archive_path: format!("/{}/", target.archive_path),
        });
    };
    let patterns = Patterns::new()?;

    let mut rewritten = 0usize;
    let mut out = String::with_capacity(snapshot.content.len());

    for (line, disabled) in patterns.classify(&snapshot.content) {
        if disabled {
            out.push_str(line);
            continue;
        }
        if let Some(caps) = patterns.one_line.captures(line) {
            let new_uri = patterns
                .uri
                .captures(&caps["uri"])
                .and_then(|uri| target.rewrite(&uri));
            if let Some(new_uri) = new_uri {
                out.push_str(&caps["head"]);
                out.push_str(&new_uri);
                out.push_str(&caps["tail"]);
                out.push_str(&caps["eol"]);
                rewritten += 1;
                continue;
            }
        } else if let Some(caps) = patterns.uris.captures(line) {
            let mut changed = false;
            let uris = rewrite_tokens(&caps["uris"], |token| {
                let new_uri = patterns
                    .uri
                    .captures(token)
                    .and_then(|uri| target.rewrite(&uri));
                changed |= new_uri.is_some();
                new_uri
            });
            if changed {
                out.push_str(&caps["head"]);
                out.push_str(&uris);
                out.push_str(&caps["eol"]);
                rewritten += 1;
                continue;
            }
        }
        out.push_str(line);
    }

    if rewritten == 0 {
        return Err(MirrorError::NothingToRewrite {
            path: PathBuf::from(&snapshot.origin),
            archive_path: format!("/{}/", target.archive_path),
        });
    }
    Ok(out)
}

/// Map whitespace-separated tokens, keeping the separators exactly.
fn rewrite_tokens(field: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while !rest.is_empty() {
        let ws = rest.len() - rest.trim_start().len();
        out.push_str(&rest[..ws]);
        rest = &rest[ws..];
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..end];
        match f(token) {
            Some(new) => out.push_str(&new),
            None => out.push_str(token),
        }
        rest = &rest[end..];
    }
    out
}
