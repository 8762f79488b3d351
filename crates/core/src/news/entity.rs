use crate::common::Market;
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// 新闻条目来源站点。每个变体对应一个采集器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsSource {
    Gdelt,
    SecRss,
    Kap,
    GoogleNewsRss,
}

/// # Summary
/// 规范化后的新闻条目。
///
/// # Invariants
/// - 经过 [`crate::news::port::canonicalize_url`] 处理后，`url` 必定是规范形式；
///   绝不存在未规范化的实例进入持久层。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    /// 规范化 URL 的 SHA-256 前 16 位十六进制字符，见
    /// [`crate::news::port::stable_id`]。
    pub id: String,
    pub source: NewsSource,
    pub source_id: Option<String>,
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub language: Option<String>,
    pub summary: Option<String>,
    pub raw: Value,
    pub discovered_at: DateTime<Utc>,
}

/// 股票代码实体。由核心以 upsert 语义写一次，此后只读。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub market: Market,
    pub name: Option<String>,
}

/// 分类标签实体。名称小写、唯一。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

/// 新闻条目与股票代码的关联，携带置信度。主键为 `(news_item_id, ticker_symbol)`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerAssociation {
    pub news_item_id: String,
    pub ticker_symbol: String,
    pub confidence: f64,
}

/// 新闻条目与标签的关联，无需置信度（确定性打标）。主键为 `(news_item_id, tag_name)`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAssociation {
    pub news_item_id: String,
    pub tag_name: String,
}

/// `Deterministic Tagger` 对一段文本的抽取结果。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntities {
    pub tickers: Vec<String>,
    pub tags: Vec<String>,
}

/// # Summary
/// `GET /news?category=` 的过滤维度：三个市场分类各自对应关联到该市场代码的
/// 新闻，`Economy` 对应打了 `macro` 标签、但未关联任何代码的宏观新闻。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NewsCategory {
    Crypto,
    Bist,
    Us,
    Economy,
}

impl NewsCategory {
    /// 对应市场分类时返回其 [`Market`]；`Economy` 没有对应市场，返回 `None`。
    pub fn market(&self) -> Option<Market> {
        match self {
            NewsCategory::Crypto => Some(Market::Crypto),
            NewsCategory::Bist => Some(Market::Bist),
            NewsCategory::Us => Some(Market::Us),
            NewsCategory::Economy => None,
        }
    }
}

impl fmt::Display for NewsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NewsCategory::Crypto => "crypto",
            NewsCategory::Bist => "bist",
            NewsCategory::Us => "us",
            NewsCategory::Economy => "economy",
        };
        f.write_str(s)
    }
}

impl FromStr for NewsCategory {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crypto" => Ok(NewsCategory::Crypto),
            "bist" => Ok(NewsCategory::Bist),
            "us" => Ok(NewsCategory::Us),
            "economy" => Ok(NewsCategory::Economy),
            other => Err(CoreError::InvalidCategory(other.to_string())),
        }
    }
}

/// 批量摄入一轮的统计结果。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub tickers_attached: usize,
    pub tags_attached: usize,
    pub processing_time_ms: u64,
    pub errors: Vec<String>,
}
