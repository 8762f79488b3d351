use rand::Rng;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerflow_cache::TtlCache;
use tickerflow_core::common::Clock;
use tickerflow_core::error::CoreError;
use tickerflow_resilience::ThrottledLimiter;
use tokio::sync::Mutex;

/// 精细化的 HTTP 失败分类，供调用方区分"要不要重试""要不要降级到陈旧缓存"。
#[derive(Debug, thiserror::Error, Clone)]
pub enum HttpFailure {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http {code}: {snippet}")]
    HttpStatus { code: u16, snippet: String },
    #[error("request canceled")]
    Canceled,
}

impl From<HttpFailure> for CoreError {
    fn from(f: HttpFailure) -> Self {
        match f {
            HttpFailure::Timeout => CoreError::NetworkError("timeout".to_string()),
            HttpFailure::Transport(m) => CoreError::NetworkError(m),
            HttpFailure::HttpStatus { code, snippet } => {
                CoreError::ProviderError(format!("http {code}: {snippet}"))
            }
            HttpFailure::Canceled => CoreError::NetworkError("canceled".to_string()),
        }
    }
}

/// 单个 host 的限流与超时策略。
#[derive(Debug, Clone, Copy)]
pub struct HostPolicy {
    pub concurrency: usize,
    pub min_delay_ms: u64,
    pub timeout: Duration,
}

impl Default for HostPolicy {
    fn default() -> Self {
        Self {
            concurrency: 3,
            min_delay_ms: 100,
            timeout: Duration::from_secs(8),
        }
    }
}

/// 重试/退避策略，独立于 host 策略，因为它取决于上游对瞬时失败的容忍度而非
/// 连接开销。
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_ms: 500,
            cap_ms: 10_000,
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exp = policy.base_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(policy.cap_ms);
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..200);
    Duration::from_millis(capped + jitter_ms)
}

fn retry_after_from_headers(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(raw).ok()?;
    let now = std::time::SystemTime::now();
    when.duration_since(now).ok()
}

/// # Summary
/// 按 host 做限流、超时、重试/退避与小型响应缓存的 HTTP 执行器。
///
/// # Invariants
/// - 每个 host 独立拥有一个 [`ThrottledLimiter`]，彼此互不影响。
/// - 只对 `429`/`5xx`/传输层错误重试；其余 4xx 一律立即失败。
/// - 当配置了缓存 TTL，相同 URL+排序后 headers 的请求命中缓存时完全跳过
///   网络调用。
pub struct HttpExecutor {
    client: Client,
    host_policies: HashMap<String, HostPolicy>,
    default_policy: HostPolicy,
    retry_policy: RetryPolicy,
    limiters: Mutex<HashMap<String, Arc<ThrottledLimiter>>>,
    cache: Option<Arc<TtlCache<Vec<u8>>>>,
    cache_ttl_ms: u64,
    retry_count: AtomicU64,
}

impl HttpExecutor {
    pub fn new(
        client: Client,
        default_policy: HostPolicy,
        retry_policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        cache_ttl_ms: u64,
    ) -> Self {
        let cache = if cache_ttl_ms > 0 {
            Some(Arc::new(TtlCache::new(clock, Some(256), 60_000)))
        } else {
            None
        };
        Self {
            client,
            host_policies: HashMap::new(),
            default_policy,
            retry_policy,
            limiters: Mutex::new(HashMap::new()),
            cache,
            cache_ttl_ms,
            retry_count: AtomicU64::new(0),
        }
    }

    /// 自创建以来执行过的重试次数（不含首次尝试），供 `/metrics` 汇报使用。
    pub fn retry_count(&self) -> u64 {
        self.retry_count.load(Ordering::Relaxed)
    }

    /// 为匹配某个 host 的请求覆盖默认策略（例如新闻 RSS 源应比行情 API 慢）。
    pub fn with_host_policy(mut self, host: impl Into<String>, policy: HostPolicy) -> Self {
        self.host_policies.insert(host.into(), policy);
        self
    }

    fn policy_for(&self, host: &str) -> HostPolicy {
        self.host_policies.get(host).copied().unwrap_or(self.default_policy)
    }

    async fn limiter_for(&self, host: &str) -> Arc<ThrottledLimiter> {
        let mut guard = self.limiters.lock().await;
        if let Some(l) = guard.get(host) {
            return l.clone();
        }
        let policy = self.policy_for(host);
        let limiter = Arc::new(ThrottledLimiter::new(
            policy.concurrency,
            Duration::from_millis(policy.min_delay_ms),
        ));
        guard.insert(host.to_string(), limiter.clone());
        limiter
    }

    fn cache_key(url: &str, headers: &[(&str, &str)]) -> String {
        let mut sorted = headers.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        let header_part = sorted
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        format!("{url}|{header_part}")
    }

    /// 执行一次 GET，对瞬时失败做退避重试；`build` 在每次尝试时被调用一次，
    /// 用于从头构建请求（`reqwest::RequestBuilder` 本身不可克隆）。
    pub async fn get<F>(&self, host: &str, url: &str, build: F) -> Result<Vec<u8>, HttpFailure>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let policy = self.policy_for(host);
        let limiter = self.limiter_for(host).await;

        let key = Self::cache_key(url, &[]);
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(&key) {
                return Ok(body);
            }
        }

        let result = limiter
            .submit(|| self.attempt_with_retries(&policy, url, build))
            .await?;

        if let Some(cache) = &self.cache {
            cache.set(&key, result.clone(), self.cache_ttl_ms);
        }
        Ok(result)
    }

    async fn attempt_with_retries<F>(
        &self,
        policy: &HostPolicy,
        url: &str,
        build: F,
    ) -> Result<Vec<u8>, HttpFailure>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let send = build(&self.client).timeout(policy.timeout).send();
            match tokio::time::timeout(policy.timeout, send).await {
                Err(_) => {
                    if attempt >= self.retry_policy.max_retries {
                        return Err(HttpFailure::Timeout);
                    }
                }
                Ok(Err(e)) => {
                    if e.is_timeout() {
                        if attempt >= self.retry_policy.max_retries {
                            return Err(HttpFailure::Timeout);
                        }
                    } else if attempt >= self.retry_policy.max_retries {
                        return Err(HttpFailure::Transport(e.to_string()));
                    }
                }
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .bytes()
                            .await
                            .map(|b| b.to_vec())
                            .map_err(|e| HttpFailure::Transport(e.to_string()));
                    }
                    if !is_transient(status) || attempt >= self.retry_policy.max_retries {
                        let snippet = resp
                            .text()
                            .await
                            .unwrap_or_default()
                            .chars()
                            .take(200)
                            .collect();
                        return Err(HttpFailure::HttpStatus {
                            code: status.as_u16(),
                            snippet,
                        });
                    }
                    let retry_after = retry_after_from_headers(resp.headers());
                    let delay = retry_after.unwrap_or_else(|| backoff_delay(&self.retry_policy, attempt));
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.retry_count.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            let delay = backoff_delay(&self.retry_policy, attempt);
            tokio::time::sleep(delay).await;
            attempt += 1;
            self.retry_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn url_host(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_transient_classifies_429_and_5xx() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn backoff_delay_grows_and_respects_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_ms: 500,
            cap_ms: 2_000,
        };
        let d0 = backoff_delay(&policy, 0);
        let d3 = backoff_delay(&policy, 3);
        assert!(d0.as_millis() >= 500);
        assert!(d3.as_millis() <= 2_200);
    }

    #[test]
    fn url_host_extracts_hostname() {
        assert_eq!(
            HttpExecutor::url_host("https://api.binance.com/v3/ticker"),
            "api.binance.com"
        );
    }

    #[test]
    fn cache_key_is_stable_regardless_of_header_order() {
        let a = HttpExecutor::cache_key("https://x", &[("b", "2"), ("a", "1")]);
        let b = HttpExecutor::cache_key("https://x", &[("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
    }
}
