pub mod ingestion;

pub use ingestion::{fold_stats, IngestionStore, RunOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 断路器的三个状态。`Open` 携带开启时刻以便计算剩余冷却时间。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open { opened_at: DateTime<Utc> },
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

/// 单个采集器的累计运行统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub items_collected: u64,
}

/// # Summary
/// 单个采集器（新闻源/行情 Provider）的健康快照，由 `/health/collectors` 暴露。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub collector: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_running: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub stats: CollectorStats,
}

/// 单个组件（Provider Service、存储、WebSocket 网关）的就绪状态，用于组合成
/// 整体的 readiness 判定。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub healthy: bool,
    pub circuit: Option<CircuitState>,
    pub detail: Option<String>,
}

/// 任意暴露健康状态的组件实现此契约。`Health` 有意保持极简：只问"你现在行不行"
/// 和"你叫什么名字"，具体诊断细节放进 `ComponentHealth::detail`。
pub trait Health: Send + Sync {
    fn name(&self) -> &str;
    fn health(&self) -> ComponentHealth;
}

/// 单个 Provider Service（报价/K 线/详情）的缓存与限流快照，由 `/metrics` 汇报。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
    pub limiter_active: usize,
    pub limiter_pending: usize,
    pub circuit_open: bool,
}
