use chrono::Utc;
use std::collections::HashSet;
use tickerflow_core::error::CoreError;
use tickerflow_core::health::IngestionStore;
use tickerflow_core::news::entity::IngestReport;
use tickerflow_core::news::port::{NewsFeedClient, NewsStore};

use crate::ingest;

/// # Summary
/// 跑完一个采集源的一轮：记录运行起止、拉取条目、跑摄入管线、推进游标。
///
/// # Invariants
/// - 运行记录先于抓取写入（`record_run_start`），抓取或摄入失败也会写入
///   `record_run_finish(success = false)`，保证 `/health/collectors` 永远能
///   看到上一轮的真实结局，不会卡在"运行中"。
pub async fn run_collector<F, S>(
    feed: &F,
    store: &S,
    chunk_size: usize,
    known_symbols: Option<&HashSet<String>>,
) -> Result<IngestReport, CoreError>
where
    F: NewsFeedClient,
    S: NewsStore + IngestionStore,
{
    let source = feed.source();
    let source_tag = source_tag(source);
    let run_id = format!("{source_tag}-{}", Utc::now().to_rfc3339());
    let started_at = Utc::now();
    store.record_run_start(&run_id, &source_tag, started_at).await?;

    let fetched = feed.fetch_recent().await;
    let items = match fetched {
        Ok(items) => items,
        Err(err) => {
            store
                .record_run_finish(&run_id, Utc::now(), false, 0, Some(&err.to_string()))
                .await?;
            return Err(err);
        }
    };

    let latest_published = items.iter().map(|item| item.published_at).max();
    let report = ingest::run(store, items, chunk_size, known_symbols).await;
    let success = report.errors.is_empty();
    let error_message = report.errors.first().cloned();
    let items_collected = u64::try_from(report.inserted + report.updated).unwrap_or(u64::MAX);

    store
        .record_run_finish(&run_id, Utc::now(), success, items_collected, error_message.as_deref())
        .await?;

    if let Some(latest) = latest_published {
        store.set_cursor(&source_tag, latest).await?;
    }

    Ok(report)
}

fn source_tag(source: tickerflow_core::news::entity::NewsSource) -> String {
    serde_json::to_value(source)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;
    use std::sync::Mutex;
    use tickerflow_core::news::entity::{NewsItem, NewsSource, Tag, Ticker, TickerAssociation};

    struct StubFeed {
        items: Vec<NewsItem>,
        fail: bool,
    }

    #[async_trait]
    impl NewsFeedClient for StubFeed {
        fn source(&self) -> NewsSource {
            NewsSource::SecRss
        }

        async fn fetch_recent(&self) -> Result<Vec<NewsItem>, CoreError> {
            if self.fail {
                Err(CoreError::ProviderError("feed down".into()))
            } else {
                Ok(self.items.clone())
            }
        }
    }

    #[derive(Default)]
    struct MemStore {
        urls: Mutex<HashSet<String>>,
        runs: Mutex<Vec<(String, bool)>>,
        cursor: Mutex<Option<DateTime<Utc>>>,
    }

    #[async_trait]
    impl NewsStore for MemStore {
        async fn find_existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, CoreError> {
            let known = self.urls.lock().unwrap();
            Ok(urls.iter().filter(|u| known.contains(*u)).cloned().collect())
        }

        async fn insert_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
            let mut urls = self.urls.lock().unwrap();
            let mut n = 0;
            for item in items {
                if urls.insert(item.url.clone()) {
                    n += 1;
                }
            }
            Ok(n)
        }

        async fn update_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
            Ok(items.len())
        }

        async fn id_for_url(&self, url: &str) -> Result<Option<String>, CoreError> {
            Ok(Some(tickerflow_core::news::stable_id(url)))
        }

        async fn upsert_ticker(&self, _ticker: &Ticker) -> Result<(), CoreError> {
            Ok(())
        }

        async fn upsert_tag(&self, _tag: &Tag) -> Result<(), CoreError> {
            Ok(())
        }

        async fn attach_ticker(&self, _assoc: TickerAssociation) -> Result<(), CoreError> {
            Ok(())
        }

        async fn attach_tag(&self, _news_item_id: &str, _tag_name: &str) -> Result<(), CoreError> {
            Ok(())
        }

        async fn known_symbols(&self) -> Result<HashSet<String>, CoreError> {
            Ok(HashSet::new())
        }

        async fn list_recent(
            &self,
            _category: Option<tickerflow_core::news::NewsCategory>,
            _limit: usize,
        ) -> Result<Vec<NewsItem>, CoreError> {
            Ok(Vec::new())
        }

        async fn get_by_id(&self, _id: &str) -> Result<Option<NewsItem>, CoreError> {
            Ok(None)
        }
    }

    #[async_trait]
    impl IngestionStore for MemStore {
        async fn record_run_start(&self, run_id: &str, _source: &str, _started_at: DateTime<Utc>) -> Result<(), CoreError> {
            self.runs.lock().unwrap().push((run_id.to_string(), false));
            Ok(())
        }

        async fn record_run_finish(
            &self,
            run_id: &str,
            _finished_at: DateTime<Utc>,
            success: bool,
            _items_collected: u64,
            _error: Option<&str>,
        ) -> Result<(), CoreError> {
            let mut runs = self.runs.lock().unwrap();
            if let Some(entry) = runs.iter_mut().find(|(id, _)| id == run_id) {
                entry.1 = success;
            }
            Ok(())
        }

        async fn get_cursor(&self, _source: &str) -> Result<Option<DateTime<Utc>>, CoreError> {
            Ok(*self.cursor.lock().unwrap())
        }

        async fn set_cursor(&self, _source: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
            *self.cursor.lock().unwrap() = Some(at);
            Ok(())
        }
    }

    fn sample_item(url: &str) -> NewsItem {
        NewsItem {
            id: String::new(),
            source: NewsSource::SecRss,
            source_id: None,
            title: "Form 8-K filed".to_string(),
            url: url.to_string(),
            published_at: Utc::now(),
            language: Some("en".to_string()),
            summary: None,
            raw: json!({}),
            discovered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn successful_run_advances_cursor_and_marks_run_ok() {
        let feed = StubFeed {
            items: vec![sample_item("https://example.com/x")],
            fail: false,
        };
        let store = MemStore::default();
        let report = run_collector(&feed, &store, 50, None).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert!(store.cursor.lock().unwrap().is_some());
        assert!(store.runs.lock().unwrap().iter().all(|(_, ok)| *ok));
    }

    #[tokio::test]
    async fn feed_failure_records_unsuccessful_run_and_propagates_error() {
        let feed = StubFeed {
            items: vec![],
            fail: true,
        };
        let store = MemStore::default();
        let result = run_collector(&feed, &store, 50, None).await;
        assert!(result.is_err());
        let runs = store.runs.lock().unwrap();
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].1);
    }
}
