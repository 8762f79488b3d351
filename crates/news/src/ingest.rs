use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tickerflow_core::error::CoreError;
use tickerflow_core::news::entity::{IngestReport, NewsItem, TickerAssociation};
use tickerflow_core::news::port::{canonicalize_url, stable_id, NewsStore};

use crate::tagger;

/// 默认批处理分块大小：每块独立提交、独立容错。
pub fn default_chunk_size() -> usize {
    50
}

/// # Summary
/// 对一批刚抓取、尚未规范化的条目去重/合并。
///
/// # Logic
/// 1. 规范化 URL；丢弃规范化后为空或标题为空的条目（计入跳过数）。
/// 2. 按规范 URL 分组；组内按 `publishedAt` 升序取最早者为基准记录。
/// 3. 合并元数据：多个 `sourceId` 并入 `raw._merged_source_ids`，多个
///    `discoveredAt` 并入 `raw._merged_discovered_at`；`raw` 字段本身逐键
///    合并，先到者优先，冲突值记录在 `raw._duplicates`。
/// 4. 组内除基准记录外的其余条目计入跳过数。
///
/// # Returns
/// `(合并后的条目, 批内跳过数)`。
pub fn dedup_batch(items: Vec<NewsItem>) -> (Vec<NewsItem>, usize) {
    let mut skipped = 0usize;
    let mut groups: HashMap<String, Vec<NewsItem>> = HashMap::new();

    for mut item in items {
        let canonical = canonicalize_url(&item.url);
        if canonical.is_empty() || item.title.trim().is_empty() {
            skipped += 1;
            continue;
        }
        item.url = canonical;
        item.id = stable_id(&item.url);
        groups.entry(item.url.clone()).or_default().push(item);
    }

    let mut merged = Vec::with_capacity(groups.len());
    for (_, mut group) in groups {
        skipped += group.len().saturating_sub(1);
        group.sort_by_key(|i| i.published_at);
        merged.push(merge_group(group));
    }
    (merged, skipped)
}

fn merge_group(mut group: Vec<NewsItem>) -> NewsItem {
    let mut base = group.remove(0);
    if group.is_empty() {
        return base;
    }

    let mut raw_obj = base.raw.as_object().cloned().unwrap_or_default();
    let mut duplicates = serde_json::Map::new();
    let mut source_ids: Vec<String> = base.source_id.iter().cloned().collect();
    let mut discovered_ats = vec![base.discovered_at.to_rfc3339()];

    for extra in group {
        if let Some(sid) = extra.source_id {
            if !source_ids.contains(&sid) {
                source_ids.push(sid);
            }
        }
        discovered_ats.push(extra.discovered_at.to_rfc3339());

        if let Some(extra_obj) = extra.raw.as_object() {
            for (key, value) in extra_obj {
                match raw_obj.get(key) {
                    Some(existing) if existing != value => {
                        duplicates
                            .entry(key.clone())
                            .or_insert_with(|| Value::Array(Vec::new()))
                            .as_array_mut()
                            .expect("duplicates entries are always arrays")
                            .push(value.clone());
                    }
                    Some(_) => {}
                    None => {
                        raw_obj.insert(key.clone(), value.clone());
                    }
                }
            }
        }
    }

    if source_ids.len() > 1 {
        raw_obj.insert(
            "_merged_source_ids".to_string(),
            Value::Array(source_ids.into_iter().map(Value::String).collect()),
        );
    }
    if discovered_ats.len() > 1 {
        raw_obj.insert(
            "_merged_discovered_at".to_string(),
            Value::Array(discovered_ats.into_iter().map(Value::String).collect()),
        );
    }
    if !duplicates.is_empty() {
        raw_obj.insert("_duplicates".to_string(), Value::Object(duplicates));
    }

    base.raw = Value::Object(raw_obj);
    base
}

/// # Summary
/// 对一批原始条目跑完整摄入管线：去重合并、按 URL 存在性分入插入/更新集、
/// 固定大小分块提交，并为每条写入记录提取的代码/标签关联。
///
/// # Invariants
/// - 单个 chunk 处理失败只中断该 chunk（记录到 `errors`），后续 chunk 照常继续。
pub async fn run<S: NewsStore>(
    store: &S,
    items: Vec<NewsItem>,
    chunk_size: usize,
    known_symbols: Option<&HashSet<String>>,
) -> IngestReport {
    let start = Instant::now();
    let (deduped, skipped) = dedup_batch(items);
    let mut report = IngestReport {
        skipped,
        ..IngestReport::default()
    };

    for chunk in deduped.chunks(chunk_size.max(1)) {
        if let Err(err) = process_chunk(store, chunk, known_symbols, &mut report).await {
            tracing::warn!(error = %err, "news ingestion chunk failed");
            report.errors.push(err.to_string());
        }
    }

    report.processing_time_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    report
}

async fn process_chunk<S: NewsStore>(
    store: &S,
    chunk: &[NewsItem],
    known_symbols: Option<&HashSet<String>>,
    report: &mut IngestReport,
) -> Result<(), CoreError> {
    let urls: Vec<String> = chunk.iter().map(|item| item.url.clone()).collect();
    let existing = store.find_existing_urls(&urls).await?;

    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    for item in chunk {
        if existing.contains(&item.url) {
            to_update.push(item.clone());
        } else {
            to_insert.push(item.clone());
        }
    }

    if !to_insert.is_empty() {
        report.inserted += store.insert_batch(&to_insert).await?;
    }
    if !to_update.is_empty() {
        report.updated += store.update_batch(&to_update).await?;
    }

    for item in chunk {
        let Some(news_item_id) = store.id_for_url(&item.url).await? else {
            continue;
        };
        let haystack = match &item.summary {
            Some(summary) => format!("{} {summary}", item.title),
            None => item.title.clone(),
        };
        let extracted = tagger::extract(&haystack, known_symbols);

        for symbol in &extracted.tickers {
            store
                .attach_ticker(TickerAssociation {
                    news_item_id: news_item_id.clone(),
                    ticker_symbol: symbol.clone(),
                    confidence: 1.0,
                })
                .await?;
            report.tickers_attached += 1;
        }
        for tag in &extracted.tags {
            store
                .upsert_tag(&tickerflow_core::news::entity::Tag { name: tag.clone() })
                .await?;
            store.attach_tag(&news_item_id, tag).await?;
            report.tags_attached += 1;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use tickerflow_core::news::entity::{NewsSource, Tag, Ticker};

    #[derive(Default)]
    struct FakeStore {
        urls: Mutex<HashSet<String>>,
        inserted: Mutex<Vec<NewsItem>>,
        updated: Mutex<Vec<NewsItem>>,
        ticker_assocs: Mutex<Vec<TickerAssociation>>,
        tag_assocs: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NewsStore for FakeStore {
        async fn find_existing_urls(&self, urls: &[String]) -> Result<HashSet<String>, CoreError> {
            let known = self.urls.lock().unwrap();
            Ok(urls.iter().filter(|u| known.contains(*u)).cloned().collect())
        }

        async fn insert_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
            let mut urls = self.urls.lock().unwrap();
            let mut inserted = self.inserted.lock().unwrap();
            let mut count = 0;
            for item in items {
                if urls.insert(item.url.clone()) {
                    inserted.push(item.clone());
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn update_batch(&self, items: &[NewsItem]) -> Result<usize, CoreError> {
            self.updated.lock().unwrap().extend(items.iter().cloned());
            Ok(items.len())
        }

        async fn id_for_url(&self, url: &str) -> Result<Option<String>, CoreError> {
            Ok(Some(stable_id(url)))
        }

        async fn upsert_ticker(&self, _ticker: &Ticker) -> Result<(), CoreError> {
            Ok(())
        }

        async fn upsert_tag(&self, _tag: &Tag) -> Result<(), CoreError> {
            Ok(())
        }

        async fn attach_ticker(&self, assoc: TickerAssociation) -> Result<(), CoreError> {
            self.ticker_assocs.lock().unwrap().push(assoc);
            Ok(())
        }

        async fn attach_tag(&self, news_item_id: &str, tag_name: &str) -> Result<(), CoreError> {
            self.tag_assocs
                .lock()
                .unwrap()
                .push((news_item_id.to_string(), tag_name.to_string()));
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

    fn item(url: &str, title: &str, published_secs_ago: i64, discovered_secs_ago: i64) -> NewsItem {
        let now = Utc::now();
        NewsItem {
            id: String::new(),
            source: NewsSource::Gdelt,
            source_id: Some(format!("src-{url}")),
            title: title.to_string(),
            url: url.to_string(),
            published_at: now - chrono::Duration::seconds(published_secs_ago),
            language: Some("en".to_string()),
            summary: None,
            raw: json!({"k": "v1"}),
            discovered_at: now - chrono::Duration::seconds(discovered_secs_ago),
        }
    }

    #[test]
    fn dedup_collapses_url_variants_to_one_insert_and_counts_skips() {
        let items = vec![
            item("https://WWW.Bloomberg.COM/a?utm_source=x", "Story", 10, 10),
            item("http://www.bloomberg.com/a/", "Story", 5, 5),
            item("https://bloomberg.com/a#c", "Story", 1, 1),
        ];
        let (merged, skipped) = dedup_batch(items);
        assert_eq!(merged.len(), 1);
        assert_eq!(skipped, 2);
        assert_eq!(merged[0].url, "https://bloomberg.com/a");
    }

    #[test]
    fn dedup_keeps_earliest_published_at_as_base() {
        let items = vec![
            item("https://example.com/a", "Newer Title", 1, 1),
            item("https://example.com/a", "Older Title", 100, 50),
        ];
        let (merged, _) = dedup_batch(items);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Older Title");
    }

    #[test]
    fn dedup_drops_items_with_empty_title() {
        let mut blank = item("https://example.com/b", "", 1, 1);
        blank.title = "   ".to_string();
        let (merged, skipped) = dedup_batch(vec![blank]);
        assert!(merged.is_empty());
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn run_is_idempotent_on_rerun() {
        let store = FakeStore::default();
        let items = vec![item("https://example.com/c", "Tesla Earnings Beat", 1, 1)];
        let first = run(&store, items.clone(), 50, None).await;
        assert_eq!(first.inserted, 1);
        assert_eq!(first.updated, 0);

        let second = run(&store, items, 50, None).await;
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 1);
    }

    #[tokio::test]
    async fn run_attaches_extracted_tickers_and_tags() {
        let store = FakeStore::default();
        let items = vec![item(
            "https://example.com/d",
            "Tesla announces earnings amid lawsuit",
            1,
            1,
        )];
        let report = run(&store, items, 50, None).await;
        assert_eq!(report.tickers_attached, 1);
        assert!(report.tags_attached >= 2);
        assert_eq!(store.ticker_assocs.lock().unwrap().len(), 1);
    }
}
