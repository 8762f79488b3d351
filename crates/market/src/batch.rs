use crate::quote_service::QuoteService;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_cache::TtlCache;
use tickerflow_core::common::{Clock, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::market::entity::{MarketScan, SymbolError};
use tickerflow_core::market::port::QuoteClient;
use tickerflow_resilience::{Coalescer, ThrottledLimiter};

pub fn default_chunk_size() -> usize {
    15
}

pub fn default_max_symbols() -> usize {
    500
}

pub fn default_ttl_ms() -> u64 {
    30_000
}

pub fn default_stale_ms() -> u64 {
    120_000
}

/// # Summary
/// `GET /markets/<market>` 背后的批量行情服务：把一个大符号列表切成固定大小
/// 的分块，逐块经节流限流器提交，按符号聚合成功/失败，单个符号的失败不影响
/// 整批。
///
/// # Invariants
/// - `max_symbols` 在分块之前校验，超限直接返回 `TooManySymbols`，不触碰
///   缓存也不发起任何上游调用。
/// - 聚合结果按符号升序排序，使相同输入集合在重复请求间产生稳定输出。
pub struct BatchMarketService<C: QuoteClient> {
    quote_service: Arc<QuoteService<C>>,
    cache: TtlCache<MarketScan>,
    coalescer: Coalescer<MarketScan, CoreError>,
    limiter: ThrottledLimiter,
    chunk_size: usize,
    max_symbols: usize,
    ttl_ms: u64,
    stale_ms: u64,
    noop_breaker: Arc<tickerflow_resilience::CircuitBreaker>,
}

impl<C: QuoteClient> BatchMarketService<C> {
    pub fn new(quote_service: Arc<QuoteService<C>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            quote_service,
            cache: TtlCache::new(clock, Some(256), 60_000),
            coalescer: Coalescer::new(),
            limiter: ThrottledLimiter::new(2, Duration::from_millis(300)),
            chunk_size: default_chunk_size(),
            max_symbols: default_max_symbols(),
            ttl_ms: default_ttl_ms(),
            stale_ms: default_stale_ms(),
            noop_breaker: no_op_breaker(),
        }
    }

    pub async fn scan(&self, market_tag: &str, symbols: &[Symbol]) -> Result<MarketScan, CoreError> {
        if symbols.len() > self.max_symbols {
            return Err(CoreError::TooManySymbols {
                requested: symbols.len(),
                max: self.max_symbols,
            });
        }

        let key = cache_key(market_tag, symbols);
        if let Some(v) = self.cache.get(&key) {
            return Ok(v);
        }

        let quote_service = self.quote_service.clone();
        let chunk_size = self.chunk_size;
        let symbols_owned: Vec<Symbol> = symbols.to_vec();
        let limiter = &self.limiter;
        let breaker = self.noop_breaker.clone();

        let result = self
            .coalescer
            .run(&key, || async move {
                breaker
                    .execute(|| async move {
                        compute_scan(quote_service, symbols_owned, chunk_size, limiter).await
                    })
                    .await
            })
            .await;

        if let Ok(v) = &result {
            self.cache.set(&key, v.clone(), self.ttl_ms);
        }

        match result {
            Ok(v) => Ok(v),
            Err(err) => self
                .cache
                .get_with_stale(&key, self.stale_ms)
                .map(|s| s.value)
                .ok_or(err),
        }
    }
}

async fn compute_scan<C: QuoteClient>(
    quote_service: Arc<QuoteService<C>>,
    symbols: Vec<Symbol>,
    chunk_size: usize,
    limiter: &ThrottledLimiter,
) -> Result<MarketScan, CoreError> {
    let mut success = Vec::new();
    let mut failed = Vec::new();

    for chunk in symbols.chunks(chunk_size) {
        let quote_service = quote_service.clone();
        let chunk = chunk.to_vec();
        let results = limiter
            .submit(|| async move {
                let futures = chunk.iter().map(|symbol| {
                    let quote_service = quote_service.clone();
                    let symbol = symbol.clone();
                    async move { (symbol.clone(), quote_service.get(&symbol).await) }
                });
                join_all(futures).await
            })
            .await;

        for (symbol, outcome) in results {
            match outcome {
                Ok(quote) => success.push(quote),
                Err(err) => failed.push(SymbolError {
                    symbol,
                    code: err.code().to_string(),
                    message: err.to_string(),
                }),
            }
        }
    }

    success.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    failed.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    Ok(MarketScan {
        count: success.len() + failed.len(),
        success,
        failed,
    })
}

fn cache_key(market_tag: &str, symbols: &[Symbol]) -> String {
    let mut sorted: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    sorted.sort_unstable();
    format!("{market_tag}:{}", sorted.join(","))
}

/// 批量服务的韧性已经下沉到每个符号各自的 `QuoteService` 中，这里围绕整
/// 个分块循环提供一个永不拒绝放行的空实现，避免重复的双层断路器状态。
fn no_op_breaker() -> Arc<tickerflow_resilience::CircuitBreaker> {
    Arc::new(tickerflow_resilience::CircuitBreaker::new(
        "batch-market-noop",
        u32::MAX,
        Duration::from_secs(0),
    ))
}
