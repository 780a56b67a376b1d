//! Homebrew reads its mirrors from the shell environment. A child process
//! cannot change its parent's environment, so applying a mirror yields the
//! commands for the user to run.

pub const API_DOMAIN: &str = "HOMEBREW_API_DOMAIN";
pub const BOTTLE_DOMAIN: &str = "HOMEBREW_BOTTLE_DOMAIN";

pub fn extract_url(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Bottle host published alongside the API by providers that have one.
fn bottle_domain(url: &str) -> Option<&'static str> {
    if url.contains("tuna.tsinghua.edu.cn") {
        Some("https://mirrors.tuna.tsinghua.edu.cn/homebrew-bottles")
    } else if url.contains("ustc.edu.cn") {
        Some("https://mirrors.ustc.edu.cn/homebrew-bottles")
    } else {
        None
    }
}

pub fn exports(url: &str) -> Vec<String> {
    let mut lines = vec![format!("export {}=\"{}\"", API_DOMAIN, url)];
    if let Some(bottles) = bottle_domain(url) {
        lines.push(format!("export {}=\"{}\"", BOTTLE_DOMAIN, bottles));
    }
    lines
}

pub fn unsets() -> Vec<String> {
    vec![
        format!("unset {}", API_DOMAIN),
        format!("unset {}", BOTTLE_DOMAIN),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exports() {
        assert_eq!(
            exports("https://mirrors.ustc.edu.cn/homebrew-bottles/api"),
            vec![
                "export HOMEBREW_API_DOMAIN=\"https://mirrors.ustc.edu.cn/homebrew-bottles/api\"".to_string(),
                "export HOMEBREW_BOTTLE_DOMAIN=\"https://mirrors.ustc.edu.cn/homebrew-bottles\"".to_string(),
            ]
        );
        assert_eq!(exports("https://formulae.brew.sh/api").len(), 1);
        assert_eq!(extract_url("  "), None);
    }
}
