use crate::SqliteStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tickerflow_core::error::CoreError;
use tickerflow_core::health::{fold_stats, CollectorStats, CollectorStatus, IngestionStore, RunOutcome};

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("store error: {e}"))
}

/// # Summary
/// [`IngestionStore`] 的 SQLite 实现：记录每次采集运行的起止、增量游标，
/// 支撑 `/health/collectors` 与新闻采集器"只拉增量"逻辑。
#[async_trait]
impl IngestionStore for SqliteStore {
    async fn record_run_start(
        &self,
        run_id: &str,
        source: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO ingestion_runs (id, source, started_at, finished_at, stats_json) VALUES (?, ?, ?, NULL, NULL)",
        )
        .bind(run_id)
        .bind(source)
        .bind(started_at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn record_run_finish(
        &self,
        run_id: &str,
        finished_at: DateTime<Utc>,
        success: bool,
        items_collected: u64,
        error: Option<&str>,
    ) -> Result<(), CoreError> {
        let outcome = RunOutcome {
            success,
            items_collected,
            error: error.map(str::to_string),
        };
        let stats_json = serde_json::to_string(&outcome)
            .map_err(|e| CoreError::Internal(format!("stats serialize failed: {e}")))?;
        sqlx::query("UPDATE ingestion_runs SET finished_at = ?, stats_json = ? WHERE id = ?")
            .bind(finished_at)
            .bind(stats_json)
            .bind(run_id)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn collector_status(&self, source: &str) -> Result<CollectorStatus, CoreError> {
        let rows = sqlx::query(
            "SELECT started_at, finished_at, stats_json FROM ingestion_runs WHERE source = ? ORDER BY started_at ASC",
        )
        .bind(source)
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut outcomes = Vec::new();
        let mut last_run_at: Option<DateTime<Utc>> = None;
        let mut last_success_at: Option<DateTime<Utc>> = None;
        let mut last_error: Option<String> = None;
        let mut is_running = false;

        for row in &rows {
            let started_at: DateTime<Utc> = row.get("started_at");
            let finished_at: Option<DateTime<Utc>> = row.get("finished_at");
            let stats_json: Option<String> = row.get("stats_json");

            last_run_at = Some(started_at);
            if finished_at.is_none() {
                is_running = true;
                continue;
            }
            let outcome: RunOutcome = stats_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            if outcome.success {
                last_success_at = Some(finished_at.unwrap_or(started_at));
            } else {
                last_error = outcome.error.clone();
            }
            outcomes.push(outcome);
        }

        let stats: CollectorStats = fold_stats(&outcomes);
        Ok(CollectorStatus {
            collector: source.to_string(),
            last_run_at,
            last_success_at,
            last_error,
            is_running,
            next_run_at: None,
            stats,
        })
    }

    async fn get_cursor(&self, source: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
        let row = sqlx::query("SELECT updated_at FROM ingestion_cursors WHERE source = ?")
            .bind(source)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<DateTime<Utc>, _>("updated_at")))
    }

    async fn set_cursor(&self, source: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO ingestion_cursors (source, updated_at) VALUES (?, ?)
            ON CONFLICT(source) DO UPDATE SET updated_at = excluded.updated_at
            "#,
        )
        .bind(source)
        .bind(at)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collector_status_reflects_last_run_outcome() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let t0 = Utc::now();
        store.record_run_start("run-1", "gdelt", t0).await.unwrap();
        store
            .record_run_finish("run-1", t0, true, 12, None)
            .await
            .unwrap();

        let t1 = t0 + chrono::Duration::seconds(5);
        store.record_run_start("run-2", "gdelt", t1).await.unwrap();
        store
            .record_run_finish("run-2", t1, false, 0, Some("timeout"))
            .await
            .unwrap();

        let status = store.collector_status("gdelt").await.unwrap();
        assert_eq!(status.stats.total_runs, 2);
        assert_eq!(status.stats.successful_runs, 1);
        assert_eq!(status.stats.failed_runs, 1);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
        assert!(!status.is_running);
    }

    #[tokio::test]
    async fn unfinished_run_marks_collector_as_running() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .record_run_start("run-1", "kap", Utc::now())
            .await
            .unwrap();
        let status = store.collector_status("kap").await.unwrap();
        assert!(status.is_running);
    }

    #[tokio::test]
    async fn cursor_roundtrips_and_upserts() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.get_cursor("sec_rss").await.unwrap().is_none());
        let t = Utc::now();
        store.set_cursor("sec_rss", t).await.unwrap();
        let later = t + chrono::Duration::seconds(1);
        store.set_cursor("sec_rss", later).await.unwrap();
        let got = store.get_cursor("sec_rss").await.unwrap().unwrap();
        assert_eq!(got.timestamp(), later.timestamp());
    }
}
