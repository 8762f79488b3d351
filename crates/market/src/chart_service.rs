use crate::support::cached_call;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_cache::TtlCache;
use tickerflow_core::common::{Clock, Interval, Range, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::health::{CircuitState, ComponentHealth, Health};
use tickerflow_core::market::entity::Chart;
use tickerflow_core::market::port::ChartClient;
use tickerflow_resilience::{CircuitBreaker, Coalescer, ThrottledLimiter};

pub fn default_ttl_ms() -> u64 {
    60_000
}

pub fn default_stale_ms() -> u64 {
    120_000
}

/// K 线 Provider Service。缓存键必须完整决定响应内容，故包含符号、请求周期
/// 与请求区间三元组。
pub struct ChartService<C: ChartClient> {
    name: String,
    client: Arc<C>,
    cache: TtlCache<Chart>,
    coalescer: Coalescer<Chart, CoreError>,
    limiter: ThrottledLimiter,
    breaker: Arc<CircuitBreaker>,
    ttl_ms: u64,
    stale_ms: u64,
}

impl<C: ChartClient> ChartService<C> {
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

    pub async fn get(&self, symbol: &Symbol, interval: Interval, range: Range) -> Result<Chart, CoreError> {
        let key = format!("{}:{}:{}", symbol.as_str(), interval, range_token(range));
        let client = self.client.clone();
        let symbol_owned = symbol.clone();

        let result = cached_call(
            &self.cache,
            &self.coalescer,
            &self.limiter,
            &self.breaker,
            &key,
            self.ttl_ms,
            move || async move { client.chart(&symbol_owned, interval, range).await },
        )
        .await;

        match result {
            Ok(v) => Ok(v),
            Err(err) => {
                if let Some(staleness) = self.cache.get_with_stale(&key, self.stale_ms) {
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

fn range_token(range: Range) -> &'static str {
    match range {
        Range::Day1 => "1d",
        Range::Day5 => "5d",
        Range::Month1 => "1mo",
        Range::Month3 => "3mo",
        Range::Month6 => "6mo",
        Range::Year1 => "1y",
        Range::Year2 => "2y",
        Range::Year5 => "5y",
        Range::Year10 => "10y",
        Range::Ytd => "ytd",
        Range::Max => "max",
    }
}

impl<C: ChartClient> Health for ChartService<C> {
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
