use crate::support::cached_call;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_cache::TtlCache;
use tickerflow_core::common::{Clock, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::health::{CircuitState, ComponentHealth, Health};
use tickerflow_core::market::entity::Detail;
use tickerflow_core::market::port::DetailClient;
use tickerflow_resilience::{CircuitBreaker, Coalescer, ThrottledLimiter};

pub fn default_ttl_ms() -> u64 {
    5 * 60_000
}

pub fn default_stale_ms() -> u64 {
    300_000
}

/// 基本面/元数据 Provider Service——变化缓慢，TTL/陈旧窗口比行情类长得多。
pub struct DetailService<C: DetailClient> {
    name: String,
    client: Arc<C>,
    cache: TtlCache<Detail>,
    coalescer: Coalescer<Detail, CoreError>,
    limiter: ThrottledLimiter,
    breaker: Arc<CircuitBreaker>,
    ttl_ms: u64,
    stale_ms: u64,
}

impl<C: DetailClient> DetailService<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        client: Arc<C>,
        clock: Arc<dyn Clock>,
        concurrency: usize,
        min_delay: Duration,
        failure_threshold: u32,
        recovery_timeout: Duration,
        cache_max_size: Option<usize>,
        cache_grace_ms: u64,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: Arc::new(CircuitBreaker::new(name.clone(), failure_threshold, recovery_timeout)),
            cache: TtlCache::new(clock, cache_max_size, cache_grace_ms),
            coalescer: Coalescer::new(),
            limiter: ThrottledLimiter::new(concurrency, min_delay),
            ttl_ms: default_ttl_ms(),
            stale_ms: default_stale_ms(),
            name,
            client,
        }
    }

    pub async fn get(&self, symbol: &Symbol) -> Result<Detail, CoreError> {
        let key = symbol.as_str();
        let client = self.client.clone();
        let symbol_owned = symbol.clone();

        let result = cached_call(
            &self.cache,
            &self.coalescer,
            &self.limiter,
            &self.breaker,
            key,
            self.ttl_ms,
            move || async move { client.detail(&symbol_owned).await },
        )
        .await;

        match result {
            Ok(v) => Ok(v),
            Err(err) => {
                if let Some(staleness) = self.cache.get_with_stale(key, self.stale_ms) {
                    let mut v = staleness.value;
                    v.stale = true;
                    return Ok(v);
                }
                Err(err)
            }
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// 清空底层缓存，供 `/admin/cache/:provider/clear` 使用。
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// 缓存命中率、限流队列与断路器状态快照，供 `/metrics` 汇报使用。
    pub fn metrics(&self) -> tickerflow_core::health::ProviderMetrics {
        tickerflow_core::health::ProviderMetrics {
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            cache_size: self.cache.size(),
            limiter_active: self.limiter.active_count(),
            limiter_pending: self.limiter.pending_count(),
            circuit_open: self.breaker.is_open(),
        }
    }
}

impl<C: DetailClient> Health for DetailService<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> ComponentHealth {
        let circuit = self.breaker.state_snapshot();
        ComponentHealth {
            name: self.name.clone(),
            healthy: !matches!(circuit, CircuitState::Open { .. }),
            circuit: Some(circuit),
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use tickerflow_core::common::FakeClock;

    struct AlwaysFailingClient;

    #[async_trait]
    impl DetailClient for AlwaysFailingClient {
        async fn detail(&self, _symbol: &Symbol) -> Result<Detail, CoreError> {
            Err(CoreError::SymbolNotFound("ZZZZ".into()))
        }
    }

    struct OkThenGoneClient {
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl DetailClient for OkThenGoneClient {
        async fn detail(&self, symbol: &Symbol) -> Result<Detail, CoreError> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(CoreError::ProviderError("down".into()));
            }
            Ok(Detail {
                symbol: symbol.clone(),
                source: "market-data".to_string(),
                fetched_at: Utc::now(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn surfaces_typed_error_when_nothing_cached() {
        let service = DetailService::new(
            "market-data",
            Arc::new(AlwaysFailingClient),
            Arc::new(FakeClock::new()),
            3,
            Duration::from_millis(0),
            5,
            Duration::from_secs(3600),
            None,
            60_000,
        );
        let err = service
            .get(&Symbol::parse("ZZZZ").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SYMBOL_NOT_FOUND");
    }

    #[tokio::test]
    async fn falls_back_to_stale_cache_on_subsequent_failure() {
        let client = Arc::new(OkThenGoneClient {
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let clock = Arc::new(FakeClock::new());
        let service = DetailService::new(
            "market-data",
            client.clone(),
            clock.clone(),
            3,
            Duration::from_millis(0),
            5,
            Duration::from_secs(3600),
            None,
            600_000,
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let fresh = service.get(&symbol).await.unwrap();
        assert!(!fresh.stale);

        clock.advance(Duration::from_millis(default_ttl_ms() + 1));
        client.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let stale = service.get(&symbol).await.unwrap();
        assert!(stale.stale);
    }
}
