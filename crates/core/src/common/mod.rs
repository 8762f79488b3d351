pub mod interval;
pub mod symbol;
pub mod time;

pub use interval::{Interval, Range};
pub use symbol::Symbol;
pub use time::{Clock, FakeClock, RealClock};

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 核心支持的市场分类。用于挑选对应的 Provider Client、News 分类以及符号
/// 后缀规则。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Crypto,
    Bist,
    Us,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Market::Crypto => "crypto",
            Market::Bist => "bist",
            Market::Us => "us",
        };
        f.write_str(s)
    }
}

impl FromStr for Market {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "crypto" => Ok(Market::Crypto),
            "bist" => Ok(Market::Bist),
            "us" => Ok(Market::Us),
            other => Err(CoreError::InvalidMarket(other.to_string())),
        }
    }
}

/// 单调时钟毫秒时间戳，`CacheEntry` 的 `storedAt`/`expiresAt` 均以此为单位。
pub type MonotonicMs = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_roundtrips_through_display_and_from_str() {
        for m in [Market::Crypto, Market::Bist, Market::Us] {
            let s = m.to_string();
            assert_eq!(Market::from_str(&s).unwrap(), m);
        }
    }

    #[test]
    fn market_from_str_is_case_insensitive() {
        assert_eq!(Market::from_str("CRYPTO").unwrap(), Market::Crypto);
    }

    #[test]
    fn market_rejects_unknown_token() {
        assert!(Market::from_str("nasdaq").is_err());
    }
}
