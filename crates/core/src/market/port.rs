use crate::common::{Interval, Range, Symbol};
use crate::error::CoreError;
use crate::market::entity::{Candle, Chart, Detail, Quote, Tick};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// # Summary
/// 单标的实时报价客户端契约。由具体 Provider Client（加密货币交易所、通用行情
/// 供应商）实现，由 Provider Service 包裹 Cache/Coalescer/Limiter/断路器后
/// 对外暴露。
///
/// # Invariants
/// - 实现者只负责"拿到一条归一化的 `Quote`"，不做缓存、不做重试决策——那些
///   是 Service 层的职责。
#[async_trait]
pub trait QuoteClient: Send + Sync {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, CoreError>;
}

/// K 线/图表客户端契约。`interval`/`range` 的映射规则（如 4h 回退到 1h）由实现
/// 自行决定，但必须在返回的 `Chart.provider_interval` 中如实记录。
#[async_trait]
pub trait ChartClient: Send + Sync {
    async fn chart(
        &self,
        symbol: &Symbol,
        interval: Interval,
        range: Range,
    ) -> Result<Chart, CoreError>;
}

/// 基本面/元数据客户端契约。
#[async_trait]
pub trait DetailClient: Send + Sync {
    async fn detail(&self, symbol: &Symbol) -> Result<Detail, CoreError>;
}

/// # Summary
/// 推送式行情流客户端契约，供 WebSocket 扇出层的上游监督者使用。
///
/// # Logic
/// `subscribe`/`unsubscribe` 是幂等的增量操作：重复订阅同一符号、或取消订阅
/// 未订阅的符号都不是错误。`stream` 返回的流在底层连接断开前持续产出逐笔行情；
/// 监督者负责在流结束时重连并重新订阅当前 `SymbolIndex`。
#[async_trait]
pub trait TradeStreamClient: Send + Sync {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError>;
    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError>;

    fn stream(&self) -> BoxStream<'static, Result<Tick, CoreError>>;
}

/// 一批原始 K 线样本归一化为 `Vec<Candle>`：丢弃 `close` 缺失或无时间戳的样本，
/// 按时间升序排序，并用 `close` 回填缺失的 `open`/`high`/`low`。
///
/// # Invariants
/// - 返回值按 `time` 严格升序；每根蜡烛满足
///   `low <= min(open, close) <= max(open, close) <= high`。
pub fn normalize_candles(mut raw: Vec<RawCandle>) -> Vec<Candle> {
    raw.retain(|c| c.close.is_some() && c.time.is_some());
    raw.sort_by_key(|c| c.time);

    raw.into_iter()
        .filter_map(|c| {
            let time = c.time?;
            let close = c.close?;
            let open = c.open.unwrap_or(close);
            let mut high = c.high.unwrap_or(close);
            let mut low = c.low.unwrap_or(close);
            high = high.max(open).max(close);
            low = low.min(open).min(close);
            Some(Candle {
                time,
                open,
                high,
                low,
                close,
                volume: c.volume.unwrap_or(0.0),
            })
        })
        .collect()
}

/// 归一化前的原始蜡烛样本，字段均可选以贴合上游参差不齐的响应体。
#[derive(Debug, Clone, Default)]
pub struct RawCandle {
    pub time: Option<chrono::DateTime<chrono::Utc>>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn normalize_drops_samples_missing_close_or_time() {
        let raw = vec![
            RawCandle {
                time: Some(t(1)),
                close: Some(10.0),
                ..Default::default()
            },
            RawCandle {
                time: None,
                close: Some(11.0),
                ..Default::default()
            },
            RawCandle {
                time: Some(t(2)),
                close: None,
                ..Default::default()
            },
        ];
        let out = normalize_candles(raw);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn normalize_sorts_ascending_and_fills_ohl_from_close() {
        let raw = vec![
            RawCandle {
                time: Some(t(2)),
                close: Some(20.0),
                ..Default::default()
            },
            RawCandle {
                time: Some(t(1)),
                close: Some(10.0),
                ..Default::default()
            },
        ];
        let out = normalize_candles(raw);
        assert_eq!(out[0].time, t(1));
        assert_eq!(out[1].time, t(2));
        assert_eq!(out[0].open, 10.0);
        assert_eq!(out[0].high, 10.0);
        assert_eq!(out[0].low, 10.0);
    }

    #[test]
    fn normalize_upholds_high_low_invariant_with_partial_fields() {
        let raw = vec![RawCandle {
            time: Some(t(1)),
            open: Some(15.0),
            close: Some(10.0),
            high: None,
            low: None,
            volume: Some(5.0),
        }];
        let out = normalize_candles(raw);
        let c = out[0];
        assert!(c.low <= c.open.min(c.close));
        assert!(c.high >= c.open.max(c.close));
    }
}
