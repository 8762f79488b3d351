//! # Market Provider 网关
//!
//! 把单个 Provider 的 Quote/Chart/Detail/Batch 四个 Service 捆成一个整体，
//! 让 `AppState` 按市场（crypto/us/bist）各持有一份，而不必让
//! `AppState` 自身变成泛型。

use std::sync::Arc;

use tickerflow_core::health::{ComponentHealth, Health, ProviderMetrics};
use tickerflow_core::market::port::{ChartClient, DetailClient, QuoteClient};
use tickerflow_market::{BatchMarketService, ChartService, DetailService, QuoteService};

/// 某个市场背后单个上游 Provider 的完整服务集合。
pub struct MarketGateway<C: QuoteClient + ChartClient + DetailClient> {
    pub quote: Arc<QuoteService<C>>,
    pub chart: Arc<ChartService<C>>,
    pub detail: Arc<DetailService<C>>,
    pub batch: Arc<BatchMarketService<C>>,
}

impl<C: QuoteClient + ChartClient + DetailClient> MarketGateway<C> {
    pub fn new(
        quote: Arc<QuoteService<C>>,
        chart: Arc<ChartService<C>>,
        detail: Arc<DetailService<C>>,
        batch: Arc<BatchMarketService<C>>,
    ) -> Self {
        Self { quote, chart, detail, batch }
    }

    /// 该市场下所有 Provider Service 的健康快照，供 `/health/collectors` 聚合。
    pub fn health(&self) -> Vec<ComponentHealth> {
        vec![self.quote.health(), self.chart.health(), self.detail.health()]
    }

    /// 清空该市场下报价/K 线/详情三个 Provider Service 的缓存。
    pub fn clear_caches(&self) {
        self.quote.clear_cache();
        self.chart.clear_cache();
        self.detail.clear_cache();
    }

    /// 报价/K 线/详情三个 Provider Service 各自的缓存与限流快照，供
    /// `/metrics` 汇报使用，键名与 Service 种类一一对应。
    pub fn metrics(&self) -> [(&'static str, ProviderMetrics); 3] {
        [
            ("quote", self.quote.metrics()),
            ("chart", self.chart.metrics()),
            ("detail", self.detail.metrics()),
        ]
    }
}
