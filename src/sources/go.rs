//! GOPROXY is a comma/pipe separated fallback list, e.g.
//! `https://proxy.golang.org,direct`. Only the first proxy is the source;
//! the fallbacks after it belong to the user.

pub const VARIABLE: &str = "GOPROXY";
/// What `go env GOPROXY` prints when nothing is configured.
pub const DEFAULT: &str = "https://proxy.golang.org,direct";

const KEYWORDS: [&str; 2] = ["direct", "off"];

fn split_first(value: &str) -> (&str, &str) {
    match value.find([',', '|']) {
        Some(i) => (&value[..i], &value[i..]),
        None => (value, ""),
    }
}

pub fn extract_url(value: &str) -> Option<String> {
    let (first, _) = split_first(value.trim());
    let first = first.trim();
    (!first.is_empty() && !KEYWORDS.contains(&first)).then(|| first.to_string())
}

pub fn apply(value: Option<&str>, url: &str) -> String {
    let url = url.trim_end_matches('/');
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        // 追加 ",direct" 保证私有模块可回退
        return format!("{},direct", url);
    }

    let (first, rest) = split_first(value);
    if KEYWORDS.contains(&first.trim()) {
        format!("{},{}", url, value)
    } else {
        format!("{}{}", url, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract() {
        assert_eq!(
            extract_url("https://proxy.golang.org,direct"),
            Some("https://proxy.golang.org".to_string())
        );
        assert_eq!(extract_url("https://goproxy.cn|https://goproxy.io"), Some("https://goproxy.cn".to_string()));
        assert_eq!(extract_url("direct"), None);
        assert_eq!(extract_url(""), None);
    }

    #[test]
    fn test_apply_keeps_fallbacks() {
        assert_eq!(apply(None, "https://goproxy.cn"), "https://goproxy.cn,direct");
        assert_eq!(
            apply(Some("https://proxy.golang.org|https://corp.example/go,direct"), "https://goproxy.cn/"),
            "https://goproxy.cn|https://corp.example/go,direct"
        );
        assert_eq!(apply(Some("off"), "https://goproxy.cn"), "https://goproxy.cn,off");
        let once = apply(Some("https://proxy.golang.org,direct"), "https://goproxy.cn");
        assert_eq!(apply(Some(&once), "https://goproxy.cn"), once);
    }
}
