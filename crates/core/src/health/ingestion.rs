use crate::error::CoreError;
use crate::health::{CollectorStats, CollectorStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// # Summary
/// 摄入调度状态的持久化契约：记录每个采集源的运行历史与增量游标，供
/// `GET /health/collectors` 与新闻管线的"只拉增量"逻辑共用。
///
/// # Invariants
/// - `source` 是采集源的稳定标识（如 `"gdelt"`、`"sec_rss"`），与
///   [`crate::news::entity::NewsSource`] 的 `serde` 表示保持一致。
#[async_trait]
pub trait IngestionStore: Send + Sync {
    async fn record_run_start(&self, run_id: &str, source: &str, started_at: DateTime<Utc>) -> Result<(), CoreError>;

    async fn record_run_finish(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        success: bool,
        items_collected: u64,
        error: Option<&str>,
    ) -> Result<(), CoreError>;

    async fn collector_status(&self, source: &str) -> Result<CollectorStatus, CoreError>;

    async fn get_cursor(&self, source: &str) -> Result<Option<DateTime<Utc>>, CoreError>;

    async fn set_cursor(&self, source: &str, at: DateTime<Utc>) -> Result<(), CoreError>;
}

/// 单次采集运行的结果摘要，序列化进 `ingestion_runs.stats_json`。
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RunOutcome {
    pub success: bool,
    pub items_collected: u64,
    pub error: Option<String>,
}

/// 把一组已完成的运行记录折叠为单个采集器的累计统计，供
/// [`IngestionStore::collector_status`] 的实现复用，避免各存储后端各自
/// 重写同一套折叠逻辑。
pub fn fold_stats(outcomes: &[RunOutcome]) -> CollectorStats {
    let mut stats = CollectorStats::default();
    for outcome in outcomes {
        stats.total_runs += 1;
        if outcome.success {
            stats.successful_runs += 1;
        } else {
            stats.failed_runs += 1;
        }
        stats.items_collected += outcome.items_collected;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_stats_counts_successes_and_failures_separately() {
        let outcomes = vec![
            RunOutcome {
                success: true,
                items_collected: 5,
                error: None,
            },
            RunOutcome {
                success: false,
                items_collected: 0,
                error: Some("timeout".into()),
            },
        ];
        let stats = fold_stats(&outcomes);
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert_eq!(stats.items_collected, 5);
    }
}
