//! # tickerflow-store
//!
//! SQLite 持久层：新闻条目/代码/标签/关联、采集游标与运行历史、鉴权用户表。
//! 与教师仓库的按股票/按账户分库策略不同——这里的数据没有那种写入热点，
//! 全部表共用一个 `app.db`，沿用教师 `system.rs` 的集中式单库风格。

pub mod ingestion;
pub mod news;
pub mod schema;
pub mod user;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tickerflow_core::error::CoreError;

/// # Summary
/// 持有一个共享 [`SqlitePool`] 的存储句柄；[`news::NewsStore`]、
/// [`ingestion::IngestionStore`]、[`user::UserStore`] 均以此为基础实现。
///
/// # Invariants
/// - 建表是幂等的 `CREATE TABLE IF NOT EXISTS`，多次 `connect` 同一个
///   `database_url` 不会产生冲突。
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 连接到 `database_url`（`sqlite://...`），缺失文件时自动创建，并执行
    /// schema DDL。
    pub async fn connect(database_url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| CoreError::Internal(format!("invalid database url: {e}")))?
            .create_if_missing(true);

        // 内存数据库每条新连接都是独立的一份；限定单连接以保证 schema 与
        // 后续查询落在同一份数据上（仅测试场景会用到 `:memory:`）。
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Internal(format!("database connect failed: {e}")))?;

        sqlx::query(schema::SCHEMA_SQL)
            .execute(&pool)
            .await
            .map_err(|e| CoreError::Internal(format!("schema init failed: {e}")))?;

        Ok(Self { pool })
    }

    /// 供健康检查探测存储可达性的轻量 ping。
    pub async fn ping(&self) -> Result<(), CoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::Internal(format!("store unreachable: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
