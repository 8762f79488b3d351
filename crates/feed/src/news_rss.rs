use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tickerflow_core::error::CoreError;
use tickerflow_core::news::entity::{NewsItem, NewsSource};
use tickerflow_core::news::port::{canonicalize_url, stable_id};
use tickerflow_core::news::NewsFeedClient;
use tickerflow_httpclient::HttpExecutor;

/// # Summary
/// 通用 RSS/Atom 新闻采集客户端。一个实例绑定一个 feed URL 与一个
/// [`NewsSource`] 变体；`SEC_RSS`/`KAP`/`Google News RSS` 均复用同一实现，
/// 只是构造参数不同。
pub struct RssFeedClient {
    executor: Arc<HttpExecutor>,
    client: Client,
    feed_url: String,
    host: String,
    source: NewsSource,
}

impl RssFeedClient {
    pub fn new(
        executor: Arc<HttpExecutor>,
        client: Client,
        feed_url: impl Into<String>,
        source: NewsSource,
    ) -> Self {
        let feed_url = feed_url.into();
        let host = HttpExecutor::url_host(&feed_url);
        Self {
            executor,
            client,
            feed_url,
            host,
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize, Default)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    language: Option<String>,
}

fn parse_pub_date(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl NewsFeedClient for RssFeedClient {
    fn source(&self) -> NewsSource {
        self.source
    }

    /// # Summary
    /// 拉取并解析一次 feed，返回尚未与既有存储去重的条目——去重/合并是
    /// `tickerflow-news` 批处理管线的职责，此处只负责"忠实转述上游给了什么"。
    async fn fetch_recent(&self) -> Result<Vec<NewsItem>, CoreError> {
        let bytes = self
            .executor
            .get(&self.host, &self.feed_url, |c| c.get(&self.feed_url))
            .await
            .map_err(CoreError::from)?;
        let _ = &self.client;

        let feed: Rss = quick_xml::de::from_reader(bytes.as_slice())
            .map_err(|e| CoreError::ProviderError(format!("rss parse error: {e}")))?;

        let discovered_at = Utc::now();
        let items = feed
            .channel
            .items
            .into_iter()
            .filter_map(|item| {
                let title = item.title?;
                let link = item.link?;
                let canonical_url = canonicalize_url(&link);
                if canonical_url.is_empty() {
                    return None;
                }
                let published_at = item
                    .pub_date
                    .as_deref()
                    .map(parse_pub_date)
                    .unwrap_or(discovered_at);
                Some(NewsItem {
                    id: stable_id(&canonical_url),
                    source: self.source,
                    source_id: item.guid,
                    title,
                    url: canonical_url,
                    published_at,
                    language: item.language,
                    summary: item.description,
                    raw: json!({ "feed_url": self.feed_url }),
                    discovered_at,
                })
            })
            .collect();

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pub_date_accepts_rfc2822() {
        let dt = parse_pub_date("Tue, 28 Jul 2026 10:00:00 GMT");
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2026-07-28");
    }

    #[test]
    fn parse_pub_date_falls_back_to_now_on_garbage() {
        let before = Utc::now();
        let dt = parse_pub_date("not a date");
        assert!(dt >= before);
    }
}
