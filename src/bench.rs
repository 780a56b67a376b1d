use crate::error::MirrorError;
use crate::types::{normalize_url, Backend, Mirror};
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Why a single probe produced no latency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Timeout(Duration),
    /// The host answered, but not with a 2xx.
    Status(u16),
    /// Connection refused, DNS, TLS and the like.
    Request(String),
}

impl ProbeFailure {
    /// Short form for the report's latency column.
    pub fn label(&self) -> String {
        match self {
            ProbeFailure::Timeout(_) => "Timeout".to_string(),
            ProbeFailure::Status(code) => format!("HTTP {}", code),
            ProbeFailure::Request(_) => "Error".to_string(),
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::Timeout(limit) => write!(f, "timed out after {:?}", limit),
            ProbeFailure::Status(code) => write!(f, "HTTP {}", code),
            ProbeFailure::Request(detail) => f.write_str(detail),
        }
    }
}

/// 测速结果
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub mirror: Mirror,
    /// This entry is the backend's currently configured source.
    pub current: bool,
    /// Time to response headers; `None` if the probe failed or timed out.
    pub latency: Option<Duration>,
    pub error: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn latency_ms(&self) -> Option<u128> {
        self.latency.map(|d| d.as_millis())
    }
}

/// Probe results, fastest first, failures last.
#[derive(Debug, Clone, Default)]
pub struct BenchmarkReport {
    pub results: Vec<ProbeResult>,
}

impl BenchmarkReport {
    pub fn from_results(mut results: Vec<ProbeResult>) -> Self {
        // 排序: 延迟低的在前, 失败的在后, 同延迟按名称
        results.sort_by(|a, b| {
            (a.latency.is_none(), a.latency, &a.mirror.name).cmp(&(
                b.latency.is_none(),
                b.latency,
                &b.mirror.name,
            ))
        });
        Self { results }
    }

    pub fn fastest(&self) -> Option<&ProbeResult> {
        self.results.first().filter(|r| r.latency.is_some())
    }

    pub fn current(&self) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.current)
    }

    /// `current / fastest` when a reachable current source is slower than
    /// the best mirror.
    pub fn speedup(&self) -> Option<f64> {
        let best = self.fastest()?;
        let current = self.current()?.latency?;
        let best_latency = best.latency?;
        if best.current || current <= best_latency {
            return None;
        }
        Some(current.as_secs_f64() / best_latency.as_secs_f64().max(f64::EPSILON))
    }
}

/// Concurrent latency prober.
#[derive(Debug, Clone)]
pub struct Benchmark {
    client: Client,
    timeout: Duration,
    progress: bool,
}

impl Benchmark {
    pub fn new(timeout: Duration, progress: bool) -> Self {
        // 构建 Client, 强制设置超时
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self::with_client(client, timeout, progress)
    }

    pub fn with_client(client: Client, timeout: Duration, progress: bool) -> Self {
        Self {
            client,
            timeout,
            progress,
        }
    }

    /// Probe the current source plus every candidate, all at once, and
    /// return once every probe has answered or timed out.
    pub async fn probe_all(
        &self,
        backend: Backend,
        current_url: Option<&str>,
        candidates: Vec<Mirror>,
    ) -> BenchmarkReport {
        let probes = probe_set(current_url, candidates);

        let pb = if self.progress {
            ProgressBar::new(probes.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent}% {msg}") {
            pb.set_style(style.progress_chars("|| "));
        }
        pb.set_message(format!("Testing {} mirrors...", backend));

        let tasks = probes.into_iter().map(|(mirror, current)| {
            let pb = pb.clone();
            async move {
                let outcome = self.check_latency(&mirror.url).await;
                pb.inc(1);
                match outcome {
                    Ok(latency) => ProbeResult {
                        mirror,
                        current,
                        latency: Some(latency),
                        error: None,
                    },
                    Err(e) => {
                        debug!(%backend, mirror = %mirror.name, "probe failed: {}", e);
                        let failure = match e {
                            MirrorError::Network { failure, .. } => failure,
                            other => ProbeFailure::Request(other.to_string()),
                        };
                        ProbeResult {
                            mirror,
                            current,
                            latency: None,
                            error: Some(failure),
                        }
                    }
                }
            }
        });

        let results = join_all(tasks).await;
        pb.finish_and_clear();

        BenchmarkReport::from_results(results)
    }

    /// 单个源测速: HEAD 请求, 计时到响应头 (TTFB)
    async fn check_latency(&self, url: &str) -> Result<Duration, MirrorError> {
        let url_to_test = probe_url(url);
        let network = |failure: ProbeFailure| MirrorError::Network {
            url: url_to_test.clone(),
            failure,
        };

        let start = Instant::now();
        let request = self.client.head(&url_to_test).send();
        let resp = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| network(ProbeFailure::Timeout(self.timeout)))?
            .map_err(|e| network(ProbeFailure::Request(e.to_string())))?;
        let latency = start.elapsed();

        // 只有 2xx 才算可用, 404/401 的镜像不能被 --fastest 选中
        if !resp.status().is_success() {
            return Err(network(ProbeFailure::Status(resp.status().as_u16())));
        }
        Ok(latency)
    }
}

/// The URL actually probed for a catalog entry. Sparse cargo indexes do not
/// answer on their root, but every one serves `config.json`.
fn probe_url(url: &str) -> String {
    let url = url.trim();
    if let Some(index) = url.strip_prefix("sparse+") {
        return format!("{}/config.json", index.trim_end_matches('/'));
    }
    url.trim_start_matches("git+").to_string()
}

/// `{current} ∪ candidates`, deduplicated by endpoint. A candidate matching
/// the current URL keeps its name and is flagged as current.
fn probe_set(current_url: Option<&str>, candidates: Vec<Mirror>) -> Vec<(Mirror, bool)> {
    let mut probes: Vec<(Mirror, bool)> = Vec::with_capacity(candidates.len() + 1);
    for mirror in candidates {
        if probes
            .iter()
            .any(|(m, _)| normalize_url(&m.url) == normalize_url(&mirror.url))
        {
            continue;
        }
        let current = current_url.is_some_and(|cur| mirror.matches(cur));
        probes.push((mirror, current));
    }

    if let Some(cur) = current_url {
        if !probes.iter().any(|(_, current)| *current) {
            probes.push((Mirror::new("Current", cur), true));
        }
    }
    probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn result(name: &str, ms: Option<u64>, current: bool) -> ProbeResult {
        ProbeResult {
            mirror: Mirror::new(name, &format!("https://{}.example/", name.to_lowercase())),
            current,
            latency: ms.map(Duration::from_millis),
            error: None,
        }
    }

    fn test_client() -> Client {
        Client::builder().no_proxy().build().expect("client")
    }

    /// Answers every request with an empty 200.
    async fn responsive_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    /// Answers every request with an empty 404.
    async fn not_found_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    /// Accepts connections and never says a word.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_report_ordering() {
        let report = BenchmarkReport::from_results(vec![
            result("Zeta", None, false),
            result("Tencent", Some(38), false),
            result("Beta", Some(38), false),
            result("Alpha", None, false),
            result("Aliyun", Some(25), false),
        ]);
        let names: Vec<_> = report.results.iter().map(|r| r.mirror.name.as_str()).collect();
        assert_eq!(names, ["Aliyun", "Beta", "Tencent", "Alpha", "Zeta"]);
        assert_eq!(report.fastest().map(|r| r.mirror.name.as_str()), Some("Aliyun"));
    }

    #[test]
    fn test_speedup_ratio() {
        let report = BenchmarkReport::from_results(vec![
            result("Current", Some(900), true),
            result("Tsinghua", Some(38), false),
            result("Aliyun", Some(25), false),
        ]);
        let ms: Vec<_> = report.results.iter().filter_map(|r| r.latency_ms()).collect();
        assert_eq!(ms, [25, 38, 900]);
        let ratio = report.speedup().expect("current is slower");
        assert!((ratio - 36.0).abs() < 1e-9);

        let already_best = BenchmarkReport::from_results(vec![
            result("Current", Some(10), true),
            result("Aliyun", Some(25), false),
        ]);
        assert!(already_best.speedup().is_none());

        let all_failed = BenchmarkReport::from_results(vec![result("Aliyun", None, false)]);
        assert!(all_failed.fastest().is_none());
    }

    #[test]
    fn test_probe_set_dedup() {
        let candidates = vec![
            Mirror::new("Official", "https://pypi.org/simple/"),
            Mirror::new("Aliyun", "https://mirrors.aliyun.com/pypi/simple/"),
            Mirror::new("Aliyun2", "https://mirrors.aliyun.com/pypi/simple"),
        ];

        let set = probe_set(Some("https://mirrors.aliyun.com/pypi/simple"), candidates.clone());
        assert_eq!(set.len(), 2);
        assert!(set.iter().any(|(m, cur)| m.name == "Aliyun" && *cur));

        let set = probe_set(Some("https://pypi.internal.corp/simple"), candidates.clone());
        assert_eq!(set.len(), 3);
        assert_eq!(set.last().map(|(m, cur)| (m.name.as_str(), *cur)), Some(("Current", true)));

        let set = probe_set(None, candidates);
        assert!(set.iter().all(|(_, cur)| !cur));
    }

    #[tokio::test]
    async fn test_timeout_isolation() {
        let fast = responsive_server().await;
        let silent = silent_server().await;
        let refused = {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            format!("http://{}/", listener.local_addr().expect("addr"))
        };

        let timeout = Duration::from_millis(300);
        let bench = Benchmark::with_client(test_client(), timeout, false);

        let started = Instant::now();
        let report = bench
            .probe_all(
                Backend::Pip,
                Some(&silent),
                vec![Mirror::new("Fast", &fast), Mirror::new("Refused", &refused)],
            )
            .await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(2), "took {:?}", elapsed);
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.results[0].mirror.name, "Fast");
        assert!(report.results[0].latency.is_some());

        let current = report.current().expect("current entry");
        assert!(current.latency.is_none());
        assert_eq!(current.error, Some(ProbeFailure::Timeout(timeout)));

        let refused = report.results.iter().find(|r| r.mirror.name == "Refused").expect("refused");
        assert!(refused.latency.is_none());
        assert!(matches!(refused.error, Some(ProbeFailure::Request(_))));
    }

    #[tokio::test]
    async fn test_non_success_status_is_unreachable() {
        let fast = responsive_server().await;
        let missing = not_found_server().await;
        let bench = Benchmark::with_client(test_client(), Duration::from_secs(2), false);

        let report = bench
            .probe_all(
                Backend::Docker,
                None,
                vec![Mirror::new("Broken", &missing), Mirror::new("Fast", &fast)],
            )
            .await;

        assert_eq!(report.fastest().map(|r| r.mirror.name.as_str()), Some("Fast"));
        let broken = report.results.iter().find(|r| r.mirror.name == "Broken").expect("broken");
        assert!(broken.latency.is_none());
        assert_eq!(broken.error, Some(ProbeFailure::Status(404)));
        assert_eq!(broken.error.as_ref().map(ProbeFailure::label).as_deref(), Some("HTTP 404"));

        let only_broken = bench
            .probe_all(Backend::Docker, None, vec![Mirror::new("Broken", &missing)])
            .await;
        assert!(only_broken.fastest().is_none());
    }

    #[test]
    fn test_probe_url() {
        assert_eq!(probe_url("sparse+https://rsproxy.cn/index/"), "https://rsproxy.cn/index/config.json");
        assert_eq!(probe_url("git+https://github.com/rust-lang/crates.io-index"), "https://github.com/rust-lang/crates.io-index");
        assert_eq!(probe_url(" https://pypi.org/simple/ "), "https://pypi.org/simple/");
        assert_eq!(ProbeFailure::Timeout(Duration::from_secs(3)).label(), "Timeout");
        assert_eq!(ProbeFailure::Request("connection refused".into()).label(), "Error");
    }
}
