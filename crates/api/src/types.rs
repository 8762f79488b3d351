//! # DTO (Data Transfer Object) 层
//!
//! 将内部领域模型转化为面向前端 JSON 输出的轻量结构体。
//! 所有 DTO 必须派生 `utoipa::ToSchema` 以自动进入 Swagger 文档。

use serde::{Deserialize, Serialize};
use tickerflow_core::health::{CircuitState, CollectorStatus, ComponentHealth};
use tickerflow_core::market::entity::{Chart, Detail, MarketScan, Quote, SymbolError};
use tickerflow_core::news::entity::{IngestReport, NewsItem};
use tickerflow_core::store::entity::User;
use utoipa::ToSchema;

// ============================================================
//  统一响应信封
// ============================================================

/// 成功响应信封：`{ok:true,result:<payload>}`。
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SuccessEnvelope<T: Serialize> {
    pub ok: bool,
    pub result: T,
}

impl<T: Serialize> SuccessEnvelope<T> {
    pub fn new(result: T) -> Self {
        Self { ok: true, result }
    }
}

/// 失败响应体：`{code,message}`。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// 失败响应信封：`{ok:false,error:{code,message}}`。
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorBody,
}

// ============================================================
//  行情相关 DTO
// ============================================================

/// 实时报价 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuoteResponse {
    #[schema(example = "BTCUSDT")]
    pub symbol: String,
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
    /// 上游 Provider 标记的数据时间 (RFC 3339)
    pub provider_timestamp: String,
    pub source: String,
    /// `true` 表示命中了失败时返回的陈旧缓存
    pub stale: bool,
    pub fetched_at: String,
}

impl From<Quote> for QuoteResponse {
    fn from(q: Quote) -> Self {
        Self {
            symbol: q.symbol.as_str().to_string(),
            name: q.name,
            display_name: q.display_name,
            exchange: q.exchange,
            currency: q.currency,
            price: q.price,
            change: q.change,
            change_percent: q.change_percent,
            previous_close: q.previous_close,
            open: q.open,
            day_high: q.day_high,
            day_low: q.day_low,
            volume: q.volume,
            market_cap: q.market_cap,
            fifty_two_week_high: q.fifty_two_week_high,
            fifty_two_week_low: q.fifty_two_week_low,
            provider_timestamp: q.provider_timestamp.to_rfc3339(),
            source: q.source,
            stale: q.stale,
            fetched_at: q.fetched_at.to_rfc3339(),
        }
    }
}

/// 单条失败符号 DTO，出现在批量报价/市场扫描结果里。
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SymbolErrorResponse {
    pub symbol: String,
    pub code: String,
    pub message: String,
}

impl From<SymbolError> for SymbolErrorResponse {
    fn from(e: SymbolError) -> Self {
        Self {
            symbol: e.symbol.as_str().to_string(),
            code: e.code,
            message: e.message,
        }
    }
}

/// `GET /<market>/quotes` 批量报价响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuotesResponse {
    pub quotes: Vec<QuoteResponse>,
    pub errors: Vec<SymbolErrorResponse>,
}

/// K 线 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CandleResponse {
    /// RFC 3339 时间戳
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// K 线序列 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChartResponse {
    pub symbol: String,
    #[schema(example = "1d")]
    pub requested_interval: String,
    pub provider_interval: String,
    #[schema(example = "1y")]
    pub requested_range: String,
    pub candles: Vec<CandleResponse>,
    pub timezone: String,
    pub gmt_offset: i32,
    pub currency: String,
    pub exchange: String,
    pub first_candle_time: Option<String>,
    pub last_candle_time: Option<String>,
    pub source: String,
    pub stale: bool,
    pub fetched_at: String,
}

impl From<Chart> for ChartResponse {
    fn from(c: Chart) -> Self {
        Self {
            symbol: c.symbol.as_str().to_string(),
            requested_interval: c.requested_interval.to_string(),
            provider_interval: c.provider_interval.to_string(),
            requested_range: c.requested_range.to_string(),
            candles: c
                .candles
                .into_iter()
                .map(|candle| CandleResponse {
                    time: candle.time.to_rfc3339(),
                    open: candle.open,
                    high: candle.high,
                    low: candle.low,
                    close: candle.close,
                    volume: candle.volume,
                })
                .collect(),
            timezone: c.timezone,
            gmt_offset: c.gmt_offset,
            currency: c.currency,
            exchange: c.exchange,
            first_candle_time: c.first_candle_time.map(|t| t.to_rfc3339()),
            last_candle_time: c.last_candle_time.map(|t| t.to_rfc3339()),
            source: c.source,
            stale: c.stale,
            fetched_at: c.fetched_at.to_rfc3339(),
        }
    }
}

/// 基本面详情 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DetailResponse {
    pub symbol: String,
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
    pub listing_date: Option<String>,
    pub source: String,
    pub stale: bool,
    pub fetched_at: String,
}

impl From<Detail> for DetailResponse {
    fn from(d: Detail) -> Self {
        Self {
            symbol: d.symbol.as_str().to_string(),
            name: d.name,
            sector: d.sector,
            industry: d.industry,
            website: d.website,
            description: d.description,
            dividend_yield: d.dividend_yield,
            dividend_rate: d.dividend_rate,
            pe_ratio: d.pe_ratio,
            pb_ratio: d.pb_ratio,
            eps: d.eps,
            fifty_day_average: d.fifty_day_average,
            two_hundred_day_average: d.two_hundred_day_average,
            fifty_two_week_high: d.fifty_two_week_high,
            fifty_two_week_low: d.fifty_two_week_low,
            listing_date: d.listing_date.map(|t| t.to_rfc3339()),
            source: d.source,
            stale: d.stale,
            fetched_at: d.fetched_at.to_rfc3339(),
        }
    }
}

/// `GET /markets/<market>` 批量市场扫描响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarketScanResponse {
    pub count: usize,
    pub success: Vec<QuoteResponse>,
    pub failed: Vec<SymbolErrorResponse>,
}

impl From<MarketScan> for MarketScanResponse {
    fn from(scan: MarketScan) -> Self {
        Self {
            count: scan.count,
            success: scan.success.into_iter().map(Into::into).collect(),
            failed: scan.failed.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================
//  新闻相关 DTO
// ============================================================

/// 新闻条目 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NewsItemResponse {
    pub id: String,
    #[schema(example = "gdelt")]
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: String,
    pub language: Option<String>,
    pub summary: Option<String>,
    pub discovered_at: String,
}

impl From<NewsItem> for NewsItemResponse {
    fn from(item: NewsItem) -> Self {
        Self {
            id: item.id,
            source: format!("{:?}", item.source).to_ascii_lowercase(),
            title: item.title,
            url: item.url,
            published_at: item.published_at.to_rfc3339(),
            language: item.language,
            summary: item.summary,
            discovered_at: item.discovered_at.to_rfc3339(),
        }
    }
}

/// `GET /news` 列表响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NewsListResponse {
    pub items: Vec<NewsItemResponse>,
}

// ============================================================
//  健康检查 / 可观测性 DTO
// ============================================================

/// 断路器状态 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CircuitStateResponse {
    #[schema(example = "closed")]
    pub state: String,
    pub opened_at: Option<String>,
}

impl From<CircuitState> for CircuitStateResponse {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self { state: "closed".to_string(), opened_at: None },
            CircuitState::HalfOpen => Self { state: "half_open".to_string(), opened_at: None },
            CircuitState::Open { opened_at } => Self {
                state: "open".to_string(),
                opened_at: Some(opened_at.to_rfc3339()),
            },
        }
    }
}

/// 单个组件的健康快照 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealthResponse {
    pub name: String,
    pub healthy: bool,
    pub circuit: Option<CircuitStateResponse>,
    pub detail: Option<String>,
}

impl From<ComponentHealth> for ComponentHealthResponse {
    fn from(h: ComponentHealth) -> Self {
        Self {
            name: h.name,
            healthy: h.healthy,
            circuit: h.circuit.map(Into::into),
            detail: h.detail,
        }
    }
}

/// `GET /health/ready` 响应：整体就绪 + 各组件明细
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub components: Vec<ComponentHealthResponse>,
}

/// `GET /health/live` 响应：进程存活即可
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LivenessResponse {
    pub alive: bool,
}

/// 单个 Provider Service（报价/K 线/详情）的缓存与限流快照 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderMetricsResponse {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
    pub limiter_active: usize,
    pub limiter_pending: usize,
    pub circuit_open: bool,
}

impl From<tickerflow_core::health::ProviderMetrics> for ProviderMetricsResponse {
    fn from(m: tickerflow_core::health::ProviderMetrics) -> Self {
        Self {
            cache_hits: m.cache_hits,
            cache_misses: m.cache_misses,
            cache_size: m.cache_size,
            limiter_active: m.limiter_active,
            limiter_pending: m.limiter_pending,
            circuit_open: m.circuit_open,
        }
    }
}

/// 某个市场下报价/K 线/详情三个 Provider Service 的指标集合 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MarketMetricsResponse {
    pub quote: ProviderMetricsResponse,
    pub chart: ProviderMetricsResponse,
    pub detail: ProviderMetricsResponse,
}

/// 单个 WebSocket 扇出网关的连接数/符号数快照 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WsFanoutMetricsResponse {
    pub connected_clients: usize,
    pub distinct_symbols: usize,
}

/// `GET /metrics` 响应：全部 Provider 与 WebSocket 扇出的运行时指标
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricsResponse {
    pub crypto: MarketMetricsResponse,
    pub us: MarketMetricsResponse,
    pub bist: MarketMetricsResponse,
    pub crypto_stream: WsFanoutMetricsResponse,
    pub trade_stream: WsFanoutMetricsResponse,
    pub http_retry_count: u64,
}

/// 单个采集器运行统计 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CollectorStatusResponse {
    pub collector: String,
    pub last_run_at: Option<String>,
    pub last_success_at: Option<String>,
    pub last_error: Option<String>,
    pub is_running: bool,
    pub next_run_at: Option<String>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub items_collected: u64,
}

impl From<CollectorStatus> for CollectorStatusResponse {
    fn from(s: CollectorStatus) -> Self {
        Self {
            collector: s.collector,
            last_run_at: s.last_run_at.map(|t| t.to_rfc3339()),
            last_success_at: s.last_success_at.map(|t| t.to_rfc3339()),
            last_error: s.last_error,
            is_running: s.is_running,
            next_run_at: s.next_run_at.map(|t| t.to_rfc3339()),
            total_runs: s.stats.total_runs,
            successful_runs: s.stats.successful_runs,
            failed_runs: s.stats.failed_runs,
            items_collected: s.stats.items_collected,
        }
    }
}

/// `GET /health/collectors` 响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CollectorsStatusResponse {
    pub collectors: Vec<CollectorStatusResponse>,
}

// ============================================================
//  管理端点 DTO
// ============================================================

/// 手动触发单个采集器一轮运行后的统计响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IngestReportResponse {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub tickers_attached: usize,
    pub tags_attached: usize,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}

impl From<IngestReport> for IngestReportResponse {
    fn from(r: IngestReport) -> Self {
        Self {
            inserted: r.inserted,
            updated: r.updated,
            skipped: r.skipped,
            tickers_attached: r.tickers_attached,
            tags_attached: r.tags_attached,
            processing_time_ms: r.processing_time_ms,
            errors: r.errors,
        }
    }
}

/// `/admin/cache/:provider/clear` 响应
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheClearResponse {
    pub provider: String,
    pub cleared: bool,
}

// ============================================================
//  鉴权 DTO
// ============================================================

/// 登录请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "admin")]
    pub username: String,
    #[schema(example = "password123")]
    pub password: String,
}

/// 修改密码请求体
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    #[schema(example = "oldpassword123")]
    pub old_password: String,
    #[schema(example = "newSecurePwd!")]
    pub new_password: String,
}

/// 创建新用户请求体 (仅管理员)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "trader_01")]
    pub username: String,
    #[schema(example = "P@ssw0rd!")]
    pub password: String,
    #[schema(example = false)]
    pub is_admin: bool,
}

/// 用户基础信息响应 DTO
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    #[schema(example = "admin")]
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub must_change_password: bool,
    pub created_at: String,
}

impl From<&User> for UserResponse {
    fn from(u: &User) -> Self {
        Self {
            id: u.id.clone(),
            username: u.username.clone(),
            is_admin: u.is_admin,
            must_change_password: u.must_change_password,
            created_at: u.created_at.to_rfc3339(),
        }
    }
}

/// 登录成功返回的 Token
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LoginResponse {
    #[schema(example = "eyJhbGciOiJIUzI1NiIs...")]
    pub token: String,
    #[schema(example = 604800)]
    pub expires_in: u64,
    pub must_change_password: bool,
}

/// JWT Claims 内容 (内部使用，不暴露到 Swagger)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// 用户唯一标识
    pub sub: String,
    /// 是否为管理员
    pub is_admin: bool,
    /// Token 过期时间 (Unix 时间戳)
    pub exp: usize,
}
