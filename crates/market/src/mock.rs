use chrono::Utc;
use tickerflow_core::common::Symbol;
use tickerflow_core::market::entity::Quote;

/// # Summary
/// 当上游被判定为 down 且调用方为该 Provider 启用了 mock 回退时，合成一条
/// 稳定（同一符号每次合成结果相同）的报价，标记 `source = "mock"`。
///
/// # Invariants
/// - 纯函数，不访问任何真实数据源——这只在"没有新鲜值也没有陈旧缓存"时才会
///   被调用，绝不用来掩盖一个本应透传的错误。
pub fn mock_quote(symbol: &Symbol) -> Quote {
    let seed: u64 = symbol.as_str().bytes().map(u64::from).sum();
    let price = 10.0 + (seed % 9_000) as f64 / 10.0;
    let change_percent = ((seed % 21) as f64 - 10.0) / 10.0;
    let change = price * change_percent / 100.0;

    Quote {
        symbol: symbol.clone(),
        name: symbol.to_string(),
        display_name: None,
        exchange: "MOCK".to_string(),
        currency: "USD".to_string(),
        price,
        change,
        change_percent,
        previous_close: Some(price - change),
        open: Some(price - change),
        day_high: Some(price * 1.01),
        day_low: Some(price * 0.99),
        volume: None,
        market_cap: None,
        fifty_two_week_high: None,
        fifty_two_week_low: None,
        provider_timestamp: Utc::now(),
        source: "mock".to_string(),
        stale: false,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_quote_is_stable_for_the_same_symbol() {
        let symbol = Symbol::parse("AAPL").unwrap();
        let a = mock_quote(&symbol);
        let b = mock_quote(&symbol);
        assert_eq!(a.price, b.price);
        assert_eq!(a.source, "mock");
    }

    #[test]
    fn mock_quote_differs_across_symbols() {
        let a = mock_quote(&Symbol::parse("AAPL").unwrap());
        let b = mock_quote(&Symbol::parse("MSFT").unwrap());
        assert_ne!(a.price, b.price);
    }
}
