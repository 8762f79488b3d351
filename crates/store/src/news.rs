use crate::SqliteStore;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use std::collections::HashSet;
use tickerflow_core::error::CoreError;
use tickerflow_core::news::entity::{NewsCategory, NewsItem, NewsSource, Tag, Ticker, TickerAssociation};
use tickerflow_core::news::port::NewsStore;

fn row_to_news_item(row: &sqlx::sqlite::SqliteRow) -> Result<NewsItem, CoreError> {
    let source_tag: String = row.get("source");
    let source: NewsSource = serde_json::from_value(Value::String(source_tag))
        .map_err(|e| CoreError::Internal(format!("corrupt source column: {e}")))?;
    let raw_json: String = row.get("raw_json");
    let raw: Value = serde_json::from_str(&raw_json).unwrap_or(Value::Null);
    Ok(NewsItem {
        id: row.get("id"),
        source,
        source_id: row.get("source_id"),
        title: row.get("title"),
        url: row.get("url"),
        published_at: row.get("published_at"),
        language: row.get("language"),
        summary: row.get("summary"),
        raw,
        discovered_at: row.get("created_at"),
    })
}

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::Internal(format!("store error: {e}"))
}

/// 把 `NewsSource` 转成它 `snake_case` serde 表示对应的裸字符串（无引号），
/// 供 `source` 列存储；例如 `NewsSource::SecRss` -> `"sec_rss"`。
fn source_tag(source: tickerflow_core::news::entity::NewsSource) -> String {
    serde_json::to_value(source)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// # Summary
/// [`NewsStore`] 的 SQLite 实现，支撑批量去重/upsert 管线。
///
/// # Invariants
/// - `insert_batch`/`attach_ticker`/`attach_tag` 对唯一键冲突一律静默跳过
///   （`INSERT OR IGNORE`），其余数据库错误向上传播并中断当前批次，符合
///   §4.9 的"一批内一个 chunk 失败不影响其它 chunk"约定。
#[async_trait]
impl NewsStore for SqliteStore {
    async fn find_existing_urls(&self, canonical_urls: &[String]) -> Result<HashSet<String>, CoreError> {
        if canonical_urls.is_empty() {
            return Ok(HashSet::new());
        }
        let mut builder = sqlx::QueryBuilder::new("SELECT url FROM news_items WHERE url IN (");
        let mut separated = builder.separated(", ");
        for url in canonical_urls {
            separated.push_bind(url);
        }
        separated.push_unseparated(")");

        let rows = builder
            .build()
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("url"))
            .collect())
    }

    async fn insert_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        let mut inserted = 0usize;
        for item in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO news_items
                    (id, url, source, source_id, title, published_at, language, summary, raw_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.url)
            .bind(source_tag(item.source))
            .bind(&item.source_id)
            .bind(&item.title)
            .bind(item.published_at)
            .bind(&item.language)
            .bind(&item.summary)
            .bind(item.raw.to_string())
            .bind(item.discovered_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(inserted)
    }

    async fn update_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
        let mut tx = self.pool().begin().await.map_err(db_err)?;
        let mut updated = 0usize;
        for item in items {
            // 永不覆盖 title/published_at，只刷新可变的元数据字段。
            let result = sqlx::query(
                r#"
                UPDATE news_items
                SET source_id = ?, language = ?, summary = ?, raw_json = ?
                WHERE url = ?
                "#,
            )
            .bind(&item.source_id)
            .bind(&item.language)
            .bind(&item.summary)
            .bind(item.raw.to_string())
            .bind(&item.url)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if result.rows_affected() > 0 {
                updated += 1;
            }
        }
        tx.commit().await.map_err(db_err)?;
        Ok(updated)
    }

    async fn id_for_url(&self, canonical_url: &str) -> Result<Option<String>, CoreError> {
        let row = sqlx::query("SELECT id FROM news_items WHERE url = ?")
            .bind(canonical_url)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| r.get::<String, _>("id")))
    }

    async fn upsert_ticker(&self, ticker: &Ticker) -> Result<(), CoreError> {
        sqlx::query("INSERT OR IGNORE INTO tickers (symbol, market, name) VALUES (?, ?, ?)")
            .bind(&ticker.symbol)
            .bind(ticker.market.to_string())
            .bind(&ticker.name)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn upsert_tag(&self, tag: &Tag) -> Result<(), CoreError> {
        sqlx::query("INSERT OR IGNORE INTO tags (name) VALUES (?)")
            .bind(&tag.name)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn attach_ticker(&self, assoc: TickerAssociation) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO news_ticker_assoc (news_item_id, ticker_symbol, confidence)
            VALUES (?, ?, ?)
            ON CONFLICT(news_item_id, ticker_symbol) DO NOTHING
            "#,
        )
        .bind(&assoc.news_item_id)
        .bind(&assoc.ticker_symbol)
        .bind(assoc.confidence)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn attach_tag(&self, news_item_id: &str, tag_name: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO news_tag_assoc (news_item_id, tag_name)
            VALUES (?, ?)
            ON CONFLICT(news_item_id, tag_name) DO NOTHING
            "#,
        )
        .bind(news_item_id)
        .bind(tag_name)
        .execute(self.pool())
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn known_symbols(&self) -> Result<HashSet<String>, CoreError> {
        let rows = sqlx::query("SELECT symbol FROM tickers")
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("symbol"))
            .collect())
    }

    /// `Economy` 过滤打了 `macro` 标签、但没有任何关联代码的条目；其余三个
    /// 分类过滤关联代码属于对应 [`Market`](tickerflow_core::common::Market) 的条目。
    async fn list_recent(&self, category: Option<NewsCategory>, limit: usize) -> Result<Vec<NewsItem>, CoreError> {
        let limit = limit as i64;
        let rows = match category {
            None => sqlx::query(
                "SELECT * FROM news_items ORDER BY published_at DESC LIMIT ?",
            )
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?,
            Some(NewsCategory::Economy) => sqlx::query(
                r#"
                SELECT ni.* FROM news_items ni
                JOIN news_tag_assoc nta ON nta.news_item_id = ni.id
                WHERE nta.tag_name = 'macro'
                AND NOT EXISTS (SELECT 1 FROM news_ticker_assoc nta2 WHERE nta2.news_item_id = ni.id)
                ORDER BY ni.published_at DESC LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?,
            Some(market_category) => {
                let market = market_category
                    .market()
                    .ok_or_else(|| CoreError::Internal("category without market".into()))?;
                sqlx::query(
                    r#"
                    SELECT DISTINCT ni.* FROM news_items ni
                    JOIN news_ticker_assoc nta ON nta.news_item_id = ni.id
                    JOIN tickers t ON t.symbol = nta.ticker_symbol
                    WHERE t.market = ?
                    ORDER BY ni.published_at DESC LIMIT ?
                    "#,
                )
                .bind(market.to_string())
                .bind(limit)
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?
            }
        };
        rows.iter().map(row_to_news_item).collect()
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<NewsItem>, CoreError> {
        let row = sqlx::query("SELECT * FROM news_items WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_news_item).transpose()
    }
}

/// 读出一条存量 `news_items` 行供测试/诊断用；不是 [`NewsStore`] 契约的一
/// 部分，只是个方便的查询助手。
pub async fn raw_json_for(store: &SqliteStore, url: &str) -> Result<Option<Value>, CoreError> {
    let row = sqlx::query("SELECT raw_json FROM news_items WHERE url = ?")
        .bind(url)
        .fetch_optional(store.pool())
        .await
        .map_err(db_err)?;
    Ok(match row {
        Some(r) => {
            let raw: String = r.get("raw_json");
            Some(serde_json::from_str(&raw).unwrap_or(Value::Null))
        }
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tickerflow_core::common::Market;
    use tickerflow_core::news::entity::NewsSource;

    fn sample_item(url: &str, title: &str) -> NewsItem {
        NewsItem {
            id: tickerflow_core::news::stable_id(url),
            source: NewsSource::Gdelt,
            source_id: Some("abc".into()),
            title: title.into(),
            url: url.into(),
            published_at: Utc::now(),
            language: Some("en".into()),
            summary: None,
            raw: json!({"k": "v"}),
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_reinsert_is_idempotent() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let item = sample_item("https://example.com/a", "Title A");
        let first = store.insert_batch(&[item.clone()]).await.unwrap();
        let second = store.insert_batch(&[item.clone()]).await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn update_batch_never_touches_title() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let mut item = sample_item("https://example.com/b", "Original Title");
        store.insert_batch(&[item.clone()]).await.unwrap();

        item.title = "Rewritten Title".into();
        item.summary = Some("updated summary".into());
        let updated = store.update_batch(&[item]).await.unwrap();
        assert_eq!(updated, 1);

        let id = store
            .id_for_url("https://example.com/b")
            .await
            .unwrap()
            .unwrap();
        let row = sqlx::query("SELECT title, summary FROM news_items WHERE id = ?")
            .bind(&id)
            .fetch_one(store.pool())
            .await
            .unwrap();
        let title: String = row.get("title");
        let summary: Option<String> = row.get("summary");
        assert_eq!(title, "Original Title");
        assert_eq!(summary.as_deref(), Some("updated summary"));
    }

    #[tokio::test]
    async fn find_existing_urls_reports_only_stored_ones() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .insert_batch(&[sample_item("https://example.com/c", "C")])
            .await
            .unwrap();
        let found = store
            .find_existing_urls(&[
                "https://example.com/c".to_string(),
                "https://example.com/missing".to_string(),
            ])
            .await
            .unwrap();
        assert!(found.contains("https://example.com/c"));
        assert!(!found.contains("https://example.com/missing"));
    }

    #[tokio::test]
    async fn attach_ticker_tolerates_duplicate_association() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let item = sample_item("https://example.com/d", "D");
        store.insert_batch(&[item.clone()]).await.unwrap();
        store
            .upsert_ticker(&Ticker {
                symbol: "AAPL".into(),
                market: Market::Us,
                name: None,
            })
            .await
            .unwrap();
        let assoc = TickerAssociation {
            news_item_id: item.id.clone(),
            ticker_symbol: "AAPL".into(),
            confidence: 0.9,
        };
        store.attach_ticker(assoc.clone()).await.unwrap();
        store.attach_ticker(assoc).await.unwrap();
        let count: i64 = sqlx::query("SELECT COUNT(*) AS c FROM news_ticker_assoc")
            .fetch_one(store.pool())
            .await
            .unwrap()
            .get("c");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn list_recent_without_category_returns_newest_first() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .insert_batch(&[sample_item("https://example.com/e1", "Older")])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .insert_batch(&[sample_item("https://example.com/e2", "Newer")])
            .await
            .unwrap();

        let items = store.list_recent(None, 10).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Newer");
    }

    #[tokio::test]
    async fn list_recent_filters_by_market_category() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let item = sample_item("https://example.com/f", "AAPL earnings");
        store.insert_batch(&[item.clone()]).await.unwrap();
        store
            .upsert_ticker(&Ticker {
                symbol: "AAPL".into(),
                market: Market::Us,
                name: None,
            })
            .await
            .unwrap();
        store
            .attach_ticker(TickerAssociation {
                news_item_id: item.id.clone(),
                ticker_symbol: "AAPL".into(),
                confidence: 0.9,
            })
            .await
            .unwrap();

        let us_items = store.list_recent(Some(NewsCategory::Us), 10).await.unwrap();
        assert_eq!(us_items.len(), 1);
        let crypto_items = store.list_recent(Some(NewsCategory::Crypto), 10).await.unwrap();
        assert!(crypto_items.is_empty());
    }

    #[tokio::test]
    async fn list_recent_economy_excludes_items_with_ticker_associations() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let macro_item = sample_item("https://example.com/g", "Fed raises rates");
        store.insert_batch(&[macro_item.clone()]).await.unwrap();
        store.attach_tag(&macro_item.id, "macro").await.unwrap();

        let tied_item = sample_item("https://example.com/h", "AAPL and inflation");
        store.insert_batch(&[tied_item.clone()]).await.unwrap();
        store.attach_tag(&tied_item.id, "macro").await.unwrap();
        store
            .upsert_ticker(&Ticker {
                symbol: "AAPL".into(),
                market: Market::Us,
                name: None,
            })
            .await
            .unwrap();
        store
            .attach_ticker(TickerAssociation {
                news_item_id: tied_item.id.clone(),
                ticker_symbol: "AAPL".into(),
                confidence: 0.5,
            })
            .await
            .unwrap();

        let economy_items = store.list_recent(Some(NewsCategory::Economy), 10).await.unwrap();
        assert_eq!(economy_items.len(), 1);
        assert_eq!(economy_items[0].id, macro_item.id);
    }

    #[tokio::test]
    async fn get_by_id_returns_none_for_unknown_id() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        assert!(store.get_by_id("deadbeefdeadbeef").await.unwrap().is_none());
    }
}
