use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use tickerflow_core::common::{Interval, Range, Symbol};
use tickerflow_core::error::CoreError;
use tickerflow_core::market::entity::{Chart, Detail, Quote, Tick};
use tickerflow_core::market::port::{normalize_candles, ChartClient, DetailClient, QuoteClient, RawCandle, TradeStreamClient};
use tickerflow_httpclient::HttpExecutor;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// 发往 WS 监督者后台任务的增量订阅变更。
enum ControlMsg {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

/// # Summary
/// 加密货币交易所客户端：REST 侧的现价查询、WS 侧的逐笔成交流。
///
/// # Invariants
/// - `subscribe`/`unsubscribe` 是幂等的：对已订阅符号重复订阅、或取消未订阅
///   的符号都不是错误，只更新内部订阅集合。
/// - `subscribed` 是重连后重新订阅的唯一依据；监督者从不信任连接本身的状态。
pub struct CryptoClient {
    executor: Arc<HttpExecutor>,
    client: Client,
    rest_base_url: String,
    ws_url: String,
    host: String,
    subscribed: Arc<Mutex<HashSet<String>>>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlMsg>>>,
    tx: mpsc::Sender<Result<Tick, CoreError>>,
    rx: Mutex<Option<mpsc::Receiver<Result<Tick, CoreError>>>>,
}

#[derive(Deserialize, Debug)]
struct TickerResponse {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChange")]
    price_change: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "highPrice")]
    high_price: String,
    #[serde(rename = "lowPrice")]
    low_price: String,
    volume: String,
}

#[derive(Deserialize, Debug)]
struct TradeFrame {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

impl CryptoClient {
    pub fn new(
        executor: Arc<HttpExecutor>,
        client: Client,
        rest_base_url: impl Into<String>,
        ws_url: impl Into<String>,
    ) -> Self {
        let rest_base_url = rest_base_url.into();
        let host = HttpExecutor::url_host(&rest_base_url);
        let (tx, rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            executor,
            client,
            rest_base_url,
            ws_url: ws_url.into(),
            host,
            subscribed: Arc::new(Mutex::new(HashSet::new())),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    fn parse_f64(raw: &str, field: &str) -> Result<f64, CoreError> {
        raw.parse::<f64>()
            .map_err(|_| CoreError::ProviderError(format!("unparseable {field}: {raw}")))
    }

    /// # Summary
    /// 启动上游 WS 监督者：断线按 1s→2s→4s…封顶 30s 的指数退避重连，重连后
    /// 用当时的 `subscribed` 快照重新订阅，绝不依赖连接内部状态。
    ///
    /// # Invariants
    /// - 每个 [`CryptoClient`] 只应调用一次；第二次调用会因 `control_rx`
    ///   已被取走而直接返回。
    pub fn spawn_supervisor(self: &Arc<Self>) {
        let Some(mut control_rx) = self.control_rx.try_lock().ok().and_then(|mut g| g.take()) else {
            return;
        };
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = RECONNECT_BASE;
            loop {
                match client.run_connection(&mut control_rx).await {
                    Ok(()) => backoff = RECONNECT_BASE,
                    Err(err) => {
                        tracing::warn!(error = %err, "crypto ws connection failed");
                    }
                }
                let jitter_ms = rand::thread_rng().gen_range(0..250);
                tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                backoff = (backoff * 2).min(RECONNECT_CAP);
            }
        });
    }

    async fn run_connection(&self, control_rx: &mut mpsc::UnboundedReceiver<ControlMsg>) -> Result<(), CoreError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.ws_url)
            .await
            .map_err(|e| CoreError::ProviderError(format!("ws connect failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        let snapshot: Vec<String> = self.subscribed.lock().await.iter().cloned().collect();
        if !snapshot.is_empty() {
            send_subscribe_frame(&mut write, &snapshot, true).await?;
        }

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_trade_text(&text).await,
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(CoreError::ProviderError(format!("ws read error: {err}"))),
                        None => return Ok(()),
                    }
                }
                ctl = control_rx.recv() => {
                    match ctl {
                        Some(ControlMsg::Subscribe(symbols)) => send_subscribe_frame(&mut write, &symbols, true).await?,
                        Some(ControlMsg::Unsubscribe(symbols)) => send_subscribe_frame(&mut write, &symbols, false).await?,
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_trade_text(&self, text: &str) {
        let Ok(frame) = serde_json::from_str::<TradeFrame>(text) else {
            return;
        };
        let Ok(price) = Self::parse_f64(&frame.price, "p") else {
            return;
        };
        let Ok(symbol) = Symbol::parse(&frame.symbol) else {
            return;
        };
        let timestamp = Utc
            .timestamp_millis_opt(frame.trade_time_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let tick = Tick {
            symbol,
            price,
            change_24h: None,
            change_percent_24h: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            timestamp,
        };
        let _ = self.tx.try_send(Ok(tick));
    }
}

type WsWrite = futures::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn send_subscribe_frame(write: &mut WsWrite, symbols: &[String], subscribe: bool) -> Result<(), CoreError> {
    let method = if subscribe { "SUBSCRIBE" } else { "UNSUBSCRIBE" };
    let params: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@trade", s.to_ascii_lowercase()))
        .collect();
    let frame = serde_json::json!({ "method": method, "params": params, "id": 1 });
    write
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| CoreError::ProviderError(format!("ws send failed: {e}")))
}

#[async_trait]
impl QuoteClient for CryptoClient {
    async fn quote(&self, symbol: &Symbol) -> Result<Quote, CoreError> {
        let url = format!("{}/ticker/24hr", self.rest_base_url);
        let symbol_owned = symbol.as_str().to_string();
        let bytes = self
            .executor
            .get(&self.host, &url, |c| {
                c.get(&url).query(&[("symbol", symbol_owned.as_str())])
            })
            .await
            .map_err(CoreError::from)?;
        let _ = &self.client;

        let payload: TickerResponse =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::ProviderError(e.to_string()))?;

        let price = Self::parse_f64(&payload.last_price, "lastPrice")?;
        let change = Self::parse_f64(&payload.price_change, "priceChange")?;
        let change_percent = Self::parse_f64(&payload.price_change_percent, "priceChangePercent")?;
        let day_high = Self::parse_f64(&payload.high_price, "highPrice")?;
        let day_low = Self::parse_f64(&payload.low_price, "lowPrice")?;
        let volume = Self::parse_f64(&payload.volume, "volume")?;

        Ok(Quote {
            symbol: symbol.clone(),
            name: payload.symbol,
            display_name: None,
            exchange: "crypto".to_string(),
            currency: "USDT".to_string(),
            price,
            change,
            change_percent,
            previous_close: Some(price - change),
            open: None,
            day_high: Some(day_high),
            day_low: Some(day_low),
            volume: Some(volume),
            market_cap: None,
            fifty_two_week_high: None,
            fifty_two_week_low: None,
            provider_timestamp: Utc::now(),
            source: "crypto".to_string(),
            stale: false,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl DetailClient for CryptoClient {
    /// 交易对没有板块/估值/上市日这类公司基本面，绝大多数字段恒为 `None`；
    /// 响应序列化时以 `skip_serializing_if` 省略而非显式 `null`。
    async fn detail(&self, symbol: &Symbol) -> Result<Detail, CoreError> {
        let url = format!("{}/ticker/24hr", self.rest_base_url);
        let symbol_owned = symbol.as_str().to_string();
        let bytes = self
            .executor
            .get(&self.host, &url, |c| {
                c.get(&url).query(&[("symbol", symbol_owned.as_str())])
            })
            .await
            .map_err(CoreError::from)?;

        let payload: TickerResponse =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::ProviderError(e.to_string()))?;
        let high = Self::parse_f64(&payload.high_price, "highPrice").ok();
        let low = Self::parse_f64(&payload.low_price, "lowPrice").ok();

        Ok(Detail {
            symbol: symbol.clone(),
            name: Some(payload.symbol),
            fifty_two_week_high: high,
            fifty_two_week_low: low,
            source: "crypto".to_string(),
            stale: false,
            fetched_at: Utc::now(),
            ..Default::default()
        })
    }
}

impl CryptoClient {
    /// 交易所原生支持 spec §4.6 列出的全部 7 个周期，无需像通用行情供应商
    /// 那样把 `4h` 回退到 `1h`。
    fn kline_interval_code(interval: Interval) -> &'static str {
        match interval {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
        }
    }
}

#[async_trait]
impl ChartClient for CryptoClient {
    /// # Logic
    /// 交易所的 `/klines` 返回异构 JSON 数组（每行 `[openTime, open, high,
    /// low, close, volume, ...]`），而非对象；逐行按下标取值后复用
    /// [`normalize_candles`] 完成排序与缺失字段回填。
    async fn chart(&self, symbol: &Symbol, interval: Interval, range: Range) -> Result<Chart, CoreError> {
        let url = format!("{}/klines", self.rest_base_url);
        let symbol_owned = symbol.as_str().to_string();
        let interval_code = Self::kline_interval_code(interval);
        let start_time_ms = range.start_from(Utc::now()).timestamp_millis().to_string();

        let bytes = self
            .executor
            .get(&self.host, &url, |c| {
                c.get(&url).query(&[
                    ("symbol", symbol_owned.as_str()),
                    ("interval", interval_code),
                    ("startTime", start_time_ms.as_str()),
                    ("limit", "1000"),
                ])
            })
            .await
            .map_err(CoreError::from)?;

        let rows: Vec<Vec<Value>> =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::ProviderError(e.to_string()))?;

        let raw: Vec<RawCandle> = rows
            .iter()
            .map(|row| RawCandle {
                time: row
                    .first()
                    .and_then(Value::as_i64)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                open: row.get(1).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                high: row.get(2).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                low: row.get(3).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                close: row.get(4).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                volume: row.get(5).and_then(Value::as_str).and_then(|s| s.parse().ok()),
            })
            .collect();
        let candles = normalize_candles(raw);

        Ok(Chart {
            symbol: symbol.clone(),
            requested_interval: interval,
            provider_interval: interval,
            requested_range: range,
            first_candle_time: candles.first().map(|c| c.time),
            last_candle_time: candles.last().map(|c| c.time),
            timezone: "UTC".to_string(),
            gmt_offset: 0,
            currency: "USDT".to_string(),
            exchange: "crypto".to_string(),
            candles,
            source: "crypto".to_string(),
            stale: false,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl TradeStreamClient for CryptoClient {
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError> {
        let mut guard = self.subscribed.lock().await;
        let mut added = Vec::new();
        for s in symbols {
            if guard.insert(s.as_str().to_string()) {
                added.push(s.as_str().to_string());
            }
        }
        drop(guard);
        if !added.is_empty() {
            let _ = self.control_tx.send(ControlMsg::Subscribe(added));
        }
        Ok(())
    }

    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError> {
        let mut guard = self.subscribed.lock().await;
        let mut removed = Vec::new();
        for s in symbols {
            if guard.remove(s.as_str()) {
                removed.push(s.as_str().to_string());
            }
        }
        drop(guard);
        if !removed.is_empty() {
            let _ = self.control_tx.send(ControlMsg::Unsubscribe(removed));
        }
        Ok(())
    }

    fn stream(&self) -> BoxStream<'static, Result<Tick, CoreError>> {
        let rx = self.rx.try_lock().ok().and_then(|mut guard| guard.take());
        match rx {
            Some(rx) => ReceiverStream::new(rx).boxed(),
            None => futures::stream::empty().boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f64_rejects_non_numeric_strings() {
        assert!(CryptoClient::parse_f64("not-a-number", "lastPrice").is_err());
        assert_eq!(CryptoClient::parse_f64("42.5", "lastPrice").unwrap(), 42.5);
    }

    #[test]
    fn kline_interval_code_covers_all_intervals_natively() {
        assert_eq!(CryptoClient::kline_interval_code(Interval::Minute1), "1m");
        assert_eq!(CryptoClient::kline_interval_code(Interval::Hour4), "4h");
        assert_eq!(CryptoClient::kline_interval_code(Interval::Day1), "1d");
    }

    #[test]
    fn klines_rows_parse_into_normalized_candles() {
        let rows: Vec<Vec<Value>> = vec![
            vec![
                Value::from(1_700_000_000_000i64),
                Value::from("100.0"),
                Value::from("110.0"),
                Value::from("95.0"),
                Value::from("105.0"),
                Value::from("12.5"),
            ],
            vec![
                Value::from(1_700_000_060_000i64),
                Value::from("105.0"),
                Value::from("108.0"),
                Value::from("104.0"),
                Value::from("106.0"),
                Value::from("8.0"),
            ],
        ];

        let raw: Vec<RawCandle> = rows
            .iter()
            .map(|row| RawCandle {
                time: row
                    .first()
                    .and_then(Value::as_i64)
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
                open: row.get(1).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                high: row.get(2).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                low: row.get(3).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                close: row.get(4).and_then(Value::as_str).and_then(|s| s.parse().ok()),
                volume: row.get(5).and_then(Value::as_str).and_then(|s| s.parse().ok()),
            })
            .collect();
        let candles = normalize_candles(raw);

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].close, 105.0);
        assert_eq!(candles[1].close, 106.0);
        assert!(candles[0].time < candles[1].time);
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        use tickerflow_httpclient::{HostPolicy, RetryPolicy};

        let executor = Arc::new(HttpExecutor::new(
            Client::new(),
            HostPolicy::default(),
            RetryPolicy::default(),
            Arc::new(tickerflow_core::common::RealClock),
            0,
        ));
        let client = CryptoClient::new(
            executor,
            Client::new(),
            "https://api.example.com",
            "wss://stream.example.com/ws",
        );
        let symbol = Symbol::parse("BTCUSDT").unwrap();
        client.subscribe(&[symbol.clone()]).await.unwrap();
        client.subscribe(&[symbol.clone()]).await.unwrap();
        assert_eq!(client.subscribed.lock().await.len(), 1);

        client.unsubscribe(&[symbol.clone()]).await.unwrap();
        client.unsubscribe(&[symbol]).await.unwrap();
        assert!(client.subscribed.lock().await.is_empty());
    }
}
