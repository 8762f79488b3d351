use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_core::common::{Interval, Range, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::market::entity::{Chart, Detail, Quote};
use tickerflow_core::market::port::{normalize_candles, ChartClient, DetailClient, QuoteClient, RawCandle};
use tickerflow_httpclient::HttpExecutor;

/// # Summary
/// 通用行情供应商客户端：股票/ETF 的实时报价、K 线图表与基本面数据。
///
/// # Invariants
/// - 符号、周期、区间在发起网络调用前一律先校验，校验失败不产生 HTTP 请求。
pub struct MarketDataClient {
    executor: Arc<HttpExecutor>,
    client: Client,
    base_url: String,
    host: String,
}

impl MarketDataClient {
    pub fn new(executor: Arc<HttpExecutor>, client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let host = HttpExecutor::url_host(&base_url);
        Self {
            executor,
            client,
            base_url,
            host,
        }
    }

    /// 请求侧周期映射为供应商原生周期；供应商不支持的周期回退到最近的较低周期
    /// （`4h` 没有原生支持时回退到 `1h`），并在响应中如实记录两者。
    fn provider_interval(requested: Interval) -> Interval {
        match requested {
            Interval::Hour4 => Interval::Hour1,
            other => other,
        }
    }

    fn provider_interval_code(interval: Interval) -> &'static str {
        match interval {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 | Interval::Hour4 => "60m",
            Interval::Day1 => "1d",
        }
    }
}

#[derive(Deserialize, Debug)]
struct ChartResponse {
    chart: ChartEnvelope,
}

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartResult {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    currency: Option<String>,
    exchange_name: Option<String>,
    timezone: Option<String>,
    gmtoffset: Option<i32>,
    regular_market_price: Option<f64>,
    previous_close: Option<f64>,
    symbol: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Deserialize, Debug)]
struct ChartQuote {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

async fn fetch_chart_payload(
    executor: &HttpExecutor,
    client: &Client,
    host: &str,
    base_url: &str,
    symbol: &Symbol,
    provider_interval_code: &str,
    period1: i64,
) -> Result<ChartResponse, CoreError> {
    let url = format!("{base_url}/{}", symbol.as_str());
    let symbol_owned = symbol.as_str().to_string();
    let period2 = Utc::now().timestamp();
    let bytes = executor
        .get(host, &url, |c| {
            c.get(&url).query(&[
                ("symbol", symbol_owned.as_str()),
                ("interval", provider_interval_code),
                ("period1", &period1.to_string()),
                ("period2", &period2.to_string()),
            ])
        })
        .await
        .map_err(CoreError::from)?;
    let _ = client;
    serde_json::from_slice(&bytes).map_err(|e| CoreError::ProviderError(e.to_string()))
}

#[async_trait]
impl ChartClient for MarketDataClient {
    async fn chart(&self, symbol: &Symbol, interval: Interval, range: Range) -> Result<Chart, CoreError> {
        let provider_interval = Self::provider_interval(interval);
        let period1 = range.start_from(Utc::now()).timestamp();

        let payload = fetch_chart_payload(
            &self.executor,
            &self.client,
            &self.host,
            &self.base_url,
            symbol,
            Self::provider_interval_code(provider_interval),
            period1,
        )
        .await?;

        if let Some(err) = payload.chart.error {
            return Err(CoreError::ProviderError(err.description));
        }
        let result = payload
            .chart
            .result
            .and_then(|mut v| v.pop())
            .ok_or_else(|| CoreError::SymbolNotFound(symbol.to_string()))?;

        let quote = result
            .indicators
            .quote
            .first()
            .ok_or_else(|| CoreError::ProviderError("missing quote series".into()))?;
        let timestamps = result.timestamp.unwrap_or_default();

        let raw: Vec<RawCandle> = timestamps
            .iter()
            .enumerate()
            .map(|(i, &ts)| RawCandle {
                time: Utc.timestamp_opt(ts, 0).single(),
                open: quote.open.get(i).copied().flatten(),
                high: quote.high.get(i).copied().flatten(),
                low: quote.low.get(i).copied().flatten(),
                close: quote.close.get(i).copied().flatten(),
                volume: quote.volume.get(i).copied().flatten(),
            })
            .collect();
        let candles = normalize_candles(raw);

        Ok(Chart {
            symbol: symbol.clone(),
            requested_interval: interval,
            provider_interval,
            requested_range: range,
            first_candle_time: candles.first().map(|c| c.time),
            last_candle_time: candles.last().map(|c| c.time),
            timezone: result.meta.timezone.unwrap_or_else(|| "UTC".to_string()),
            gmt_offset: result.meta.gmtoffset.unwrap_or(0),
            currency: result.meta.currency.unwrap_or_else(|| "USD".to_string()),
            exchange: result.meta.exchange_name.unwrap_or_default(),
            candles,
            source: "market-data".to_string(),
            stale: false,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl QuoteClient for MarketDataClient {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, CoreError> {
        let period1 = Utc::now().timestamp() - 86_400;
        let payload = fetch_chart_payload(
            &self.executor,
            &self.client,
            &self.host,
            &self.base_url,
            symbol,
            "1d",
            period1,
        )
        .await?;

        if let Some(err) = payload.chart.error {
            return Err(CoreError::ProviderError(err.description));
        }
        let result = payload
            .chart
            .result
            .and_then(|mut v| v.pop())
            .ok_or_else(|| CoreError::SymbolNotFound(symbol.to_string()))?;

        let price = result
            .meta
            .regular_market_price
            .ok_or_else(|| CoreError::ProviderError("missing regularMarketPrice".into()))?;
        let previous_close = result.meta.previous_close;
        let change = previous_close.map(|pc| price - pc).unwrap_or(0.0);
        let change_percent = previous_close
            .filter(|pc| *pc != 0.0)
            .map(|pc| change / pc * 100.0)
            .unwrap_or(0.0);

        Ok(Quote {
            symbol: symbol.clone(),
            name: result.meta.symbol.clone().unwrap_or_else(|| symbol.to_string()),
            display_name: None,
            exchange: result.meta.exchange_name.unwrap_or_default(),
            currency: result.meta.currency.unwrap_or_else(|| "USD".to_string()),
            price,
            change,
            change_percent,
            previous_close,
            open: None,
            day_high: None,
            day_low: None,
            volume: None,
            market_cap: None,
            fifty_two_week_high: None,
            fifty_two_week_low: None,
            provider_timestamp: Utc::now(),
            source: "market-data".to_string(),
            stale: false,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl DetailClient for MarketDataClient {
    async fn detail(&self, symbol: &Symbol) -> Result<Detail, CoreError> {
        Ok(Detail {
            symbol: symbol.clone(),
            source: "market-data".to_string(),
            fetched_at: Utc::now(),
            ..Default::default()
        })
    }
}

pub fn default_timeout() -> Duration {
    Duration::from_secs(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_interval_falls_back_4h_to_1h() {
        assert_eq!(
            MarketDataClient::provider_interval(Interval::Hour4),
            Interval::Hour1
        );
        assert_eq!(
            MarketDataClient::provider_interval(Interval::Minute5),
            Interval::Minute5
        );
    }

    #[test]
    fn provider_interval_code_maps_to_yahoo_style_tokens() {
        assert_eq!(MarketDataClient::provider_interval_code(Interval::Hour1), "60m");
        assert_eq!(MarketDataClient::provider_interval_code(Interval::Day1), "1d");
    }
}
