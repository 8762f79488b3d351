use crate::mock::mock_quote;
use crate::support::cached_call;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_cache::TtlCache;
use tickerflow_core::common::{Clock, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::health::{CircuitState, ComponentHealth, Health};
use tickerflow_core::market::entity::Quote;
use tickerflow_core::market::port::QuoteClient;
use tickerflow_resilience::{CircuitBreaker, Coalescer, ThrottledLimiter};

/// 单个 Provider 的实时报价默认 TTL/陈旧窗口（spec 建议值）。
pub fn default_ttl_ms() -> u64 {
    10_000
}

pub fn default_stale_ms() -> u64 {
    120_000
}

/// # Summary
/// 包裹某个 [`QuoteClient`] 实现的报价 Provider Service：缓存 → 单飞 →
/// 节流 → 断路器，全部对调用方透明。
///
/// # Invariants
/// - 同一 `name` 的服务应全局只持有一份实例（被 Coalescer/Limiter/Breaker
///   的状态共享假设依赖），通常由组合根以 `Arc` 持有。
pub struct QuoteService<C: QuoteClient> {
    name: String,
    client: Arc<C>,
    cache: TtlCache<Quote>,
    coalescer: Coalescer<Quote, CoreError>,
    limiter: ThrottledLimiter,
    breaker: Arc<CircuitBreaker>,
    ttl_ms: u64,
    stale_ms: u64,
    mock_enabled: bool,
}

impl<C: QuoteClient> QuoteService<C> {
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
        mock_enabled: bool,
    ) -> Self {
        let name = name.into();
        Self {
            breaker: Arc::new(CircuitBreaker::new(name.clone(), failure_threshold, recovery_timeout)),
            cache: TtlCache::new(clock, cache_max_size, cache_grace_ms),
            coalescer: Coalescer::new(),
            limiter: ThrottledLimiter::new(concurrency, min_delay),
            ttl_ms: default_ttl_ms(),
            stale_ms: default_stale_ms(),
            mock_enabled,
            name,
            client,
        }
    }

    /// 按 §4.6 的标准流程取一条报价：新鲜缓存 → 单飞网络调用 → 失败时陈旧
    /// 缓存 → 失败时 mock（若启用且断路器已打开）→ 错误透传。
    pub async fn get(&self, symbol: &Symbol) -> Result<Quote, CoreError> {
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
            move || async move { client.quote(&symbol_owned).await },
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
                if self.mock_enabled && self.breaker.is_open() {
                    return Ok(mock_quote(symbol));
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

impl<C: QuoteClient> Health for QuoteService<C> {
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
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tickerflow_core::common::FakeClock;

    struct FlakyClient {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl QuoteClient for FlakyClient {
        async fn quote(&self, symbol: &Symbol) -> Result<Quote, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(CoreError::ProviderError("upstream hiccup".into()));
            }
            Ok(Quote {
                symbol: symbol.clone(),
                name: symbol.to_string(),
                display_name: None,
                exchange: "NASDAQ".to_string(),
                currency: "USD".to_string(),
                price: 100.0,
                change: 1.0,
                change_percent: 1.0,
                previous_close: Some(99.0),
                open: Some(99.5),
                day_high: Some(101.0),
                day_low: Some(98.0),
                volume: Some(1_000.0),
                market_cap: None,
                fifty_two_week_high: None,
                fifty_two_week_low: None,
                provider_timestamp: Utc::now(),
                source: "market-data".to_string(),
                stale: false,
                fetched_at: Utc::now(),
            })
        }
    }

    use chrono::Utc;

    fn service(client: FlakyClient, mock_enabled: bool) -> QuoteService<FlakyClient> {
        QuoteService::new(
            "market-data",
            Arc::new(client),
            Arc::new(FakeClock::new()),
            3,
            Duration::from_millis(0),
            2,
            Duration::from_secs(3600),
            None,
            60_000,
            mock_enabled,
        )
    }

    #[tokio::test]
    async fn successful_call_is_cached_and_not_repeated() {
        let service = service(
            FlakyClient {
                calls: AtomicUsize::new(0),
                fail_first_n: 0,
            },
            false,
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let first = service.get(&symbol).await.unwrap();
        let second = service.get(&symbol).await.unwrap();
        assert_eq!(first.price, second.price);
        assert_eq!(service.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_without_cache_or_mock_surfaces_typed_error() {
        let service = service(
            FlakyClient {
                calls: AtomicUsize::new(0),
                fail_first_n: 99,
            },
            false,
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let err = service.get(&symbol).await.unwrap_err();
        assert_eq!(err.code(), "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn health_reports_open_circuit_after_threshold_failures() {
        let service = service(
            FlakyClient {
                calls: AtomicUsize::new(0),
                fail_first_n: 99,
            },
            false,
        );
        let symbol = Symbol::parse("AAPL").unwrap();
        let _ = service.get(&symbol).await;
        let _ = service.get(&symbol).await;
        assert!(!service.health().healthy);
    }
}
