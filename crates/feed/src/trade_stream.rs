use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tickerflow_core::common::Symbol;
use tickerflow_core::error::CoreError;
use tickerflow_core::market::entity::Tick;
use tickerflow_core::market::port::TradeStreamClient;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(60);

enum ControlMsg {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

#[derive(Deserialize, Debug)]
struct TradeFrame {
    symbol: String,
    price: f64,
    #[serde(rename = "ts")]
    timestamp_ms: i64,
}

/// # Summary
/// 股票逐笔成交流的推送式客户端，供equity交易流WebSocket扇出端点使用；
/// REST侧的报价/K线/详情已经由 [`crate::MarketDataClient`] 覆盖，本类型只
/// 负责 `TradeStreamClient` 契约。
///
/// # Invariants
/// - 同 [`crate::CryptoClient`]：`subscribe`/`unsubscribe` 幂等，监督者重连后
///   只信任 `subscribed` 快照，不信任连接内部状态。
pub struct EquityTradeStreamClient {
    ws_url: String,
    subscribed: Arc<Mutex<HashSet<String>>>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlMsg>>>,
    tx: mpsc::Sender<Result<Tick, CoreError>>,
    rx: Mutex<Option<mpsc::Receiver<Result<Tick, CoreError>>>>,
}

impl EquityTradeStreamClient {
    pub fn new(ws_url: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            ws_url: ws_url.into(),
            subscribed: Arc::new(Mutex::new(HashSet::new())),
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// 启动重连监督者：断线按 1s→2s→4s…封顶 60s 的指数退避重连，重连后用
    /// 当时的 `subscribed` 快照重新订阅。只应调用一次。
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
                    Err(err) => tracing::warn!(error = %err, "equity trade ws connection failed"),
                }
                let jitter_ms: u64 = rand::thread_rng().gen_range(0..250);
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
            send_control_frame(&mut write, &snapshot, true).await?;
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
                        Some(ControlMsg::Subscribe(symbols)) => send_control_frame(&mut write, &symbols, true).await?,
                        Some(ControlMsg::Unsubscribe(symbols)) => send_control_frame(&mut write, &symbols, false).await?,
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
        let Ok(symbol) = Symbol::parse(&frame.symbol) else {
            return;
        };
        let timestamp = Utc
            .timestamp_millis_opt(frame.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let tick = Tick {
            symbol,
            price: frame.price,
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

async fn send_control_frame(write: &mut WsWrite, symbols: &[String], subscribe: bool) -> Result<(), CoreError> {
    let action = if subscribe { "subscribe" } else { "unsubscribe" };
    let frame = serde_json::json!({ "type": action, "symbols": symbols });
    write
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|e| CoreError::ProviderError(format!("ws send failed: {e}")))
}

#[async_trait]
impl TradeStreamClient for EquityTradeStreamClient {
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

    #[tokio::test]
    async fn subscribe_and_unsubscribe_are_idempotent() {
        let client = EquityTradeStreamClient::new("wss://trades.example.com/ws");
        let symbol = Symbol::parse("AAPL").unwrap();
        client.subscribe(&[symbol.clone()]).await.unwrap();
        client.subscribe(&[symbol.clone()]).await.unwrap();
        assert_eq!(client.subscribed.lock().await.len(), 1);

        client.unsubscribe(&[symbol.clone()]).await.unwrap();
        client.unsubscribe(&[symbol]).await.unwrap();
        assert!(client.subscribed.lock().await.is_empty());
    }

    #[test]
    fn trade_frame_parses_minimal_shape() {
        let raw = r#"{"symbol":"AAPL","price":193.5,"ts":1700000000000}"#;
        let frame: TradeFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.symbol, "AAPL");
        assert_eq!(frame.price, 193.5);
    }
}
