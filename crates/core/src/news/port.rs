use crate::news::entity::{NewsCategory, NewsItem, Tag, Ticker, TickerAssociation};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// 固定跟踪参数黑名单：UTM 家族、常见点击 ID、分析平台参数。
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "ref",
    "ref_src",
    "spm",
];

static TRACKING_PARAM_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| TRACKING_PARAMS.iter().copied().collect());

/// # Summary
/// 将一个原始 URL 字符串规范化为稳定可比较的形式，用于去重。
///
/// # Logic
/// 1. 去除首尾空白；缺失 scheme 时补全 `https://`；已有 scheme 一律强制改写为 `https`。
/// 2. host 小写；去掉前导 `www.`。
/// 3. 移除默认端口（80/443）。
/// 4. 非根路径去掉末尾 `/`。
/// 5. 删除固定黑名单中的跟踪参数，其余参数按字母序重排。
/// 6. 清空 fragment。
///
/// 解析失败时返回原始输入，永不 panic。
///
/// # Invariants
/// - 该函数是纯函数：不做网络 I/O，不访问全局可变状态。
pub fn canonicalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = match url::Url::parse(&with_scheme) {
        Ok(u) => u,
        Err(_) => return raw.to_string(),
    };

    if url.scheme() != "https" && url.set_scheme("https").is_err() {
        return raw.to_string();
    }

    let host = match url.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return raw.to_string(),
    };
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if url.set_host(Some(&host)).is_err() {
        return raw.to_string();
    }

    if matches!(url.port(), Some(80) | Some(443)) {
        let _ = url.set_port(None);
    }

    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAM_SET.contains(k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort_by(|a, b| a.0.cmp(&b.0));
    if kept.is_empty() {
        url.set_query(None);
    } else {
        let qs = kept
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        url.set_query(Some(&qs));
    }

    url.set_fragment(None);
    url.to_string()
}

/// 稳定 ID：canonical URL 的 SHA-256 前 16 个十六进制字符。
pub fn stable_id(canonical_url: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(canonical_url.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// # Summary
/// 新闻持久层契约：上层的批量去重/更新管线依赖此接口与关系型存储交互。
///
/// # Invariants
/// - 所有写方法对唯一键冲突必须宽容（`insert` 遇冲突跳过，`attach_*`
///   遇重复关联忽略），其余错误一律向上传播并中断当前批次。
#[async_trait]
pub trait NewsStore: Send + Sync {
    async fn find_existing_urls(
        &self,
        canonical_urls: &[String],
    ) -> Result<HashSet<String>, crate::error::CoreError>;

    async fn insert_batch(
        &self,
        items: &[NewsItem],
    ) -> Result<usize, crate::error::CoreError>;

    async fn update_batch(
        &self,
        items: &[NewsItem],
    ) -> Result<usize, crate::error::CoreError>;

    async fn id_for_url(
        &self,
        canonical_url: &str,
    ) -> Result<Option<String>, crate::error::CoreError>;

    async fn upsert_ticker(&self, ticker: &Ticker) -> Result<(), crate::error::CoreError>;
    async fn upsert_tag(&self, tag: &Tag) -> Result<(), crate::error::CoreError>;

    async fn attach_ticker(
        &self,
        assoc: TickerAssociation,
    ) -> Result<(), crate::error::CoreError>;
    async fn attach_tag(
        &self,
        news_item_id: &str,
        tag_name: &str,
    ) -> Result<(), crate::error::CoreError>;

    async fn known_symbols(&self) -> Result<HashSet<String>, crate::error::CoreError>;

    /// 按分类列出最近的新闻条目（`None` 表示不按分类过滤），按
    /// `published_at` 降序，最多 `limit` 条；供 `GET /news` 使用。
    async fn list_recent(
        &self,
        category: Option<NewsCategory>,
        limit: usize,
    ) -> Result<Vec<NewsItem>, crate::error::CoreError>;

    /// 按稳定 ID 查询单条新闻；供 `GET /news/article/:id` 使用。
    async fn get_by_id(&self, id: &str) -> Result<Option<NewsItem>, crate::error::CoreError>;
}

/// # Summary
/// 单个新闻采集源的抓取契约（RSS/HTTP）。具体实现位于 Provider Client 层；
/// 核心只关心"给我一批尚未规范化的条目"。
#[async_trait]
pub trait NewsFeedClient: Send + Sync {
    fn source(&self) -> crate::news::entity::NewsSource;

    async fn fetch_recent(&self) -> Result<Vec<NewsItem>, crate::error::CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_adds_scheme_and_lowercases_host() {
        assert_eq!(
            canonicalize_url("Example.com/Foo"),
            "https://example.com/Foo"
        );
    }

    #[test]
    fn canonicalize_strips_www_and_default_port() {
        assert_eq!(
            canonicalize_url("https://www.example.com:443/a/"),
            "https://example.com/a"
        );
    }

    #[test]
    fn canonicalize_coerces_http_scheme_to_https() {
        assert_eq!(
            canonicalize_url("http://www.bloomberg.com/a/"),
            "https://bloomberg.com/a"
        );
    }

    #[test]
    fn canonicalize_collapses_scheme_case_and_fragment_variants_to_one_form() {
        let a = canonicalize_url("https://WWW.Bloomberg.COM/a?utm_source=x");
        let b = canonicalize_url("http://www.bloomberg.com/a/");
        let c = canonicalize_url("https://bloomberg.com/a#c");
        assert_eq!(a, "https://bloomberg.com/a");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize_url("http://WWW.Example.com:80/a/?utm_source=x");
        let twice = canonicalize_url(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn canonicalize_removes_tracking_params_and_sorts_rest() {
        let out = canonicalize_url(
            "https://example.com/a?utm_source=x&b=2&a=1&fbclid=zzz",
        );
        assert_eq!(out, "https://example.com/a?a=1&b=2");
    }

    #[test]
    fn canonicalize_clears_fragment() {
        let out = canonicalize_url("https://example.com/a#section-2");
        assert_eq!(out, "https://example.com/a");
    }

    #[test]
    fn canonicalize_never_panics_on_garbage_input() {
        let out = canonicalize_url("not a url at all \u{0}\u{1}");
        assert!(!out.is_empty() || out.is_empty());
    }

    #[test]
    fn stable_id_is_deterministic_and_16_hex_chars() {
        let a = stable_id("https://example.com/a");
        let b = stable_id("https://example.com/a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn stable_id_differs_for_different_urls() {
        assert_ne!(
            stable_id("https://example.com/a"),
            stable_id("https://example.com/b")
        );
    }
}
