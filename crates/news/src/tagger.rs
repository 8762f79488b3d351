use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tickerflow_core::news::entity::ExtractedEntities;

/// 公司/俗称 -> 规范代码的固定别名表。大小写不敏感，按整词边界匹配。
const ALIASES: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("apple inc", "AAPL"),
    ("tesla", "TSLA"),
    ("tesla inc", "TSLA"),
    ("microsoft", "MSFT"),
    ("amazon", "AMZN"),
    ("alphabet", "GOOGL"),
    ("google", "GOOGL"),
    ("meta platforms", "META"),
    ("nvidia", "NVDA"),
    ("bitcoin", "BTCUSDT"),
    ("btc", "BTCUSDT"),
    ("ethereum", "ETHUSDT"),
    ("eth", "ETHUSDT"),
    ("turkish airlines", "THYAO"),
    ("türk hava yolları", "THYAO"),
    ("garanti bbva", "GARAN"),
    ("akbank", "AKBNK"),
];

/// 关键词 -> 分类标签的固定映射。覆盖语义重叠的同义词，值本身即规范标签名。
const TAG_KEYWORDS: &[(&str, &str)] = &[
    ("earnings", "earnings"),
    ("quarterly results", "earnings"),
    ("dividend", "dividends"),
    ("buyback", "buybacks"),
    ("merger", "m-and-a"),
    ("acquisition", "m-and-a"),
    ("acquire", "m-and-a"),
    ("ipo", "ipo"),
    ("public offering", "ipo"),
    ("bankruptcy", "bankruptcy"),
    ("lawsuit", "legal"),
    ("litigation", "legal"),
    ("regulation", "regulatory"),
    ("regulator", "regulatory"),
    ("sec", "regulatory"),
    ("interest rate", "macro"),
    ("inflation", "macro"),
    ("recession", "macro"),
    ("hack", "security"),
    ("breach", "security"),
    ("outage", "security"),
];

/// 常见英文/土耳其语短词停用表：防止裸大写短词（如 "A"、"IT"、"VE"）被误判为代码。
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "in", "on", "of", "to", "it", "at", "as", "by", "or", "be", "we",
    "ve", "bir", "bu", "da", "de", "ki", "mi",
];

fn word_regex(needle: &str) -> Regex {
    let escaped = regex::escape(needle.trim());
    Regex::new(&format!(r"(?i)\b{escaped}\b")).expect("static alias pattern is always valid")
}

static ALIAS_PATTERNS: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| ALIASES.iter().map(|(k, v)| (word_regex(k), *v)).collect());

static TAG_PATTERNS: Lazy<Vec<(Regex, &'static str)>> =
    Lazy::new(|| TAG_KEYWORDS.iter().map(|(k, v)| (word_regex(k), *v)).collect());

static BARE_TICKER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z]{1,5}\b").expect("static ticker-shape pattern is valid"));

static STOPWORD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| STOPWORDS.iter().copied().collect());

/// # Summary
/// 从一段自由文本中抽取股票代码与分类标签，纯函数、无 I/O。
///
/// # Logic
/// 1. 按固定别名表做整词、大小写不敏感匹配，命中即记录规范代码。
/// 2. 扫描形如大写 1-5 个字母的裸代码候选，过滤停用词；若提供
///    `known_symbols`，只保留其中存在的代码，否则原样保留候选。
/// 3. 按固定关键词表做整词匹配抽取分类标签。
/// 4. 对代码与标签分别去重（顺序无关紧要，调用方按需再排序）。
///
/// # Invariants
/// - 不访问网络、文件系统或任何全局可变状态；两次调用相同输入得到相同输出。
pub fn extract(text: &str, known_symbols: Option<&HashSet<String>>) -> ExtractedEntities {
    let mut tickers: Vec<String> = Vec::new();
    let mut tags: Vec<String> = Vec::new();

    for (pattern, symbol) in ALIAS_PATTERNS.iter() {
        if pattern.is_match(text) {
            tickers.push((*symbol).to_string());
        }
    }

    for candidate in BARE_TICKER_PATTERN.find_iter(text) {
        let word = candidate.as_str();
        if STOPWORD_SET.contains(word.to_ascii_lowercase().as_str()) {
            continue;
        }
        match known_symbols {
            Some(known) if known.contains(word) => tickers.push(word.to_string()),
            None => tickers.push(word.to_string()),
            Some(_) => {}
        }
    }

    for (pattern, tag) in TAG_PATTERNS.iter() {
        if pattern.is_match(text) {
            tags.push((*tag).to_string());
        }
    }

    tickers.sort();
    tickers.dedup();
    tags.sort();
    tags.dedup();

    ExtractedEntities { tickers, tags }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_known_company_alias_case_insensitively() {
        let out = extract("Apple Inc reported record iPhone sales", None);
        assert!(out.tickers.contains(&"AAPL".to_string()));
    }

    #[test]
    fn ignores_stopwords_shaped_like_tickers() {
        let out = extract("IT WAS A good quarter", None);
        assert!(!out.tickers.iter().any(|t| t == "A" || t == "IT"));
    }

    #[test]
    fn intersects_bare_candidates_with_known_symbols_when_given() {
        let mut known = HashSet::new();
        known.insert("NFLX".to_string());
        let out = extract("NFLX and ZZZZ both moved today", Some(&known));
        assert!(out.tickers.contains(&"NFLX".to_string()));
        assert!(!out.tickers.contains(&"ZZZZ".to_string()));
    }

    #[test]
    fn extracts_tags_from_keyword_table() {
        let out = extract("The company announced an acquisition amid a lawsuit", None);
        assert!(out.tags.contains(&"m-and-a".to_string()));
        assert!(out.tags.contains(&"legal".to_string()));
    }

    #[test]
    fn results_are_deduplicated() {
        let out = extract("Bitcoin surged as BTC rallied against bitcoin skeptics", None);
        assert_eq!(out.tickers.iter().filter(|t| *t == "BTCUSDT").count(), 1);
    }

    #[test]
    fn is_pure_and_deterministic() {
        let a = extract("Tesla earnings beat expectations", None);
        let b = extract("Tesla earnings beat expectations", None);
        assert_eq!(a, b);
    }
}
