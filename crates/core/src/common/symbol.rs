use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// # Summary
/// 规范化后的证券代码。全大写，仅允许字母数字及 `.`、`-`、`=` 三个标点。
///
/// # Invariants
/// - 内部字符串始终是 `normalize` 的输出，不存在未规范化的 `Symbol` 实例。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// # Summary
    /// 解析并规范化一个原始代码字符串。
    ///
    /// # Logic
    /// 1. 去除首尾空白，剥离常见的 `$` 前缀（行情软件惯用的代码前缀）。
    /// 2. 转为大写。
    /// 3. 校验字符集合：仅允许 `A-Z`、`0-9`、`.`、`-`、`=`。
    /// 4. 拒绝空字符串。
    ///
    /// # Returns
    /// 合法返回 `Symbol`，否则返回 `CoreError::InvalidSymbol`。
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim().strip_prefix('$').unwrap_or(raw.trim());
        if trimmed.is_empty() {
            return Err(CoreError::InvalidSymbol("empty symbol".into()));
        }
        let upper = trimmed.to_ascii_uppercase();
        let valid = upper
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '='));
        if !valid {
            return Err(CoreError::InvalidSymbol(raw.to_string()));
        }
        Ok(Symbol(upper))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 添加交易所后缀（如土耳其股票的 `.IS`），幂等：若已带有该后缀则不重复添加。
    pub fn with_suffix(&self, suffix: &str) -> Symbol {
        if self.0.ends_with(suffix) {
            self.clone()
        } else {
            Symbol(format!("{}{}", self.0, suffix))
        }
    }

    /// 剥离交易所后缀用于对外展示，幂等：若不带该后缀则原样返回。
    pub fn without_suffix(&self, suffix: &str) -> Symbol {
        match self.0.strip_suffix(suffix) {
            Some(stripped) => Symbol(stripped.to_string()),
            None => self.clone(),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_and_uppercases() {
        let s = Symbol::parse(" btc ").unwrap();
        assert_eq!(s.as_str(), "BTC");
    }

    #[test]
    fn parse_is_idempotent_under_reparsing() {
        let once = Symbol::parse("btcusdt").unwrap();
        let twice = Symbol::parse(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn parse_rejects_illegal_characters() {
        assert!(Symbol::parse("BTC/USDT").is_err());
        assert!(Symbol::parse("").is_err());
        assert!(Symbol::parse("   ").is_err());
    }

    #[test]
    fn parse_strips_dollar_prefix_and_stays_idempotent() {
        let s = Symbol::parse("$AAPL").unwrap();
        assert_eq!(s.as_str(), "AAPL");
        let reparsed = Symbol::parse(s.as_str()).unwrap();
        assert_eq!(s, reparsed);
    }

    #[test]
    fn parse_allows_dot_dash_equals() {
        assert!(Symbol::parse("THYAO.IS").is_ok());
        assert!(Symbol::parse("BRK-B").is_ok());
        assert!(Symbol::parse("EURUSD=X").is_ok());
    }

    #[test]
    fn suffix_roundtrip_is_idempotent() {
        let s = Symbol::parse("THYAO").unwrap();
        let with = s.with_suffix(".IS");
        assert_eq!(with.as_str(), "THYAO.IS");
        assert_eq!(with.with_suffix(".IS"), with);
        let without = with.without_suffix(".IS");
        assert_eq!(without, s);
        assert_eq!(without.without_suffix(".IS"), without);
    }
}
