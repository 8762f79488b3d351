use crate::common::{Interval, Range, Symbol};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单个标的的实时报价快照。`stale` 标记该值是否来自"失败时返回陈旧缓存"路径。
///
/// # Invariants
/// - `price >= 0`。
/// - 若 `previous_close` 存在，`change` 应在浮点误差范围内等于
///   `price - previous_close`（由构造方负责维护，本类型不做运行时校验）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub name: String,
    pub display_name: Option<String>,
    pub exchange: String,
    pub currency: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub day_high: Option<f64>,
    pub day_low: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub provider_timestamp: DateTime<Utc>,
    pub source: String,
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// 一根 K 线。`low <= min(open, close) <= max(open, close) <= high` 由 Provider
/// Client 的归一化阶段保证，本类型只是载体。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// # Summary
/// 某个符号在某个区间/周期下的完整 K 线序列，携带请求与实际返回的周期差异。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    pub symbol: Symbol,
    pub requested_interval: Interval,
    pub provider_interval: Interval,
    pub requested_range: Range,
    pub candles: Vec<Candle>,
    pub timezone: String,
    pub gmt_offset: i32,
    pub currency: String,
    pub exchange: String,
    pub first_candle_time: Option<DateTime<Utc>>,
    pub last_candle_time: Option<DateTime<Utc>>,
    pub source: String,
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// # Summary
/// WebSocket 扇出层使用的单笔逐笔行情事件，来自 [`crate::market::port::TradeStreamClient::stream`]。
///
/// # Invariants
/// - `symbol` 必须是调用方已订阅的符号之一；未订阅符号产生的事件由上游客户端
///   自行丢弃，不会进入流。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub change_percent_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// 基本面/元数据记录。除身份字段外全部可选，因为并非每个 Provider 都提供全部字段。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    pub symbol: Symbol,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub dividend_yield: Option<f64>,
    pub dividend_rate: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub pb_ratio: Option<f64>,
    pub eps: Option<f64>,
    pub fifty_day_average: Option<f64>,
    pub two_hundred_day_average: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub listing_date: Option<DateTime<Utc>>,
    pub source: String,
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// 批量行情请求的单条结果：成功时携带 `Quote`，失败时携带错误码+文案。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolError {
    pub symbol: Symbol,
    pub code: String,
    pub message: String,
}

/// `GET /markets/<market>` 的聚合响应。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketScan {
    pub count: usize,
    pub success: Vec<Quote>,
    pub failed: Vec<SymbolError>,
}
