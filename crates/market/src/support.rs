use std::future::Future;
use std::sync::Arc;
use tickerflow_cache::TtlCache;
use tickerflow_core::error::CoreError;
use tickerflow_resilience::{CircuitBreaker, Coalescer, ThrottledLimiter};

/// # Summary
/// 组合 Cache → Coalescer → Limiter → CircuitBreaker 的标准调用路径，供
/// 行情/图表/基本面三个 Provider Service 共用。
///
/// # Logic
/// 1. `cache.get` 命中直接返回 `(value, false)`。
/// 2. 否则通过 `coalescer` 确保同一 key 只有一次真正的在途调用，内部经
///    `limiter` 排队，再经 `breaker` 判定是否放行。
/// 3. 成功写回缓存；失败交由调用方决定是否回退到陈旧值或 mock。
///
/// # Returns
/// `Ok((value, from_cache))`，其中 `from_cache` 仅用于统计，不影响数据本身。
pub async fn cached_call<T, Fetch, Fut>(
    cache: &TtlCache<T>,
    coalescer: &Coalescer<T, CoreError>,
    limiter: &ThrottledLimiter,
    breaker: &Arc<CircuitBreaker>,
    key: &str,
    ttl_ms: u64,
    fetch: Fetch,
) -> Result<T, CoreError>
where
    T: Clone + Send + Sync + 'static,
    Fetch: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, CoreError>> + Send,
{
    if let Some(v) = cache.get(key) {
        return Ok(v);
    }

    let breaker = breaker.clone();
    let result = coalescer
        .run(key, || async move {
            limiter.submit(|| breaker.execute(fetch)).await
        })
        .await;

    if let Ok(v) = &result {
        cache.set(key, v.clone(), ttl_ms);
    }
    result
}

/// 失败路径的标准决策：陈旧缓存优先，其次 mock（若启用且上游被判定为down），
/// 否则把原始错误透传给调用方。
pub fn stale_or_mock<T: Clone>(
    cache: &TtlCache<T>,
    key: &str,
    stale_ms: u64,
    mock_enabled: bool,
    breaker_is_open: bool,
    mark_stale: impl FnOnce(T) -> T,
    mock: impl FnOnce() -> T,
) -> Option<T> {
    if let Some(staleness) = cache.get_with_stale(key, stale_ms) {
        return Some(mark_stale(staleness.value));
    }
    if mock_enabled && breaker_is_open {
        return Some(mock());
    }
    None
}
