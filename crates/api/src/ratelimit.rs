//! # 每 IP 令牌桶限流
//!
//! 应用于除健康检查外的所有网关端点。令牌桶按客户端 IP 独立维护，
//! 每分钟补满一次，突发请求不超过桶容量。

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use dashmap::DashMap;
use tower::{Layer, Service};

use crate::types::{ErrorBody, ErrorEnvelope};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// # Summary
/// 每 IP 一个令牌桶，补充速率与容量均由 `requests_per_minute` 决定
/// （容量等于每分钟配额，允许把整个配额作为一次突发用掉）。
///
/// # Invariants
/// - `tokens` 永不超过容量，也永不为负；扣费前先按经过时间补满。
pub struct RateLimiter {
    buckets: DashMap<IpAddr, Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Arc<Self> {
        let capacity = f64::from(requests_per_minute.max(1));
        Arc::new(Self {
            buckets: DashMap::new(),
            capacity,
            refill_per_sec: capacity / 60.0,
        })
    }

    /// 尝试为 `ip` 扣一枚令牌；成功返回 `true`，桶空则返回 `false`。
    fn try_acquire(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut entry = self.buckets.entry(ip).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(entry.last_refill).as_secs_f64();
        entry.tokens = (entry.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        entry.last_refill = now;

        if entry.tokens >= 1.0 {
            entry.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware { inner, limiter: self.limiter.clone() }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let ip = req
            .extensions()
            .get::<ConnectInfo<std::net::SocketAddr>>()
            .map(|c| c.0.ip())
            .unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));

        if !self.limiter.try_acquire(ip) {
            let retry_after = Duration::from_secs(1);
            return Box::pin(async move { Ok(rate_limited_response(retry_after)) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

fn rate_limited_response(retry_after: Duration) -> Response {
    let body = ErrorEnvelope {
        ok: false,
        error: ErrorBody {
            code: "RATE_LIMIT".to_string(),
            message: "client rate limit exceeded".to_string(),
        },
    };
    let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
    if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.as_secs().to_string()) {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}
