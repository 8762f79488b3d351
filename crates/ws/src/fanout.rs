use crate::protocol::{ClientMessage, ServerMessage, WsErrorCode};
use crate::queue::OutboundQueue;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tickerflow_core::common::Symbol;
use tickerflow_core::error::CoreError;
use tickerflow_core::health::{ComponentHealth, Health};
use tickerflow_core::market::port::TradeStreamClient;
use tracing::{debug, warn};

pub type ClientId = u64;

/// 服务端心跳 ping 的发送间隔；传输层（axum WS handler）据此安排定时器，
/// 一个周期内未收到对应 pong 的连接被视为失活并断开。
pub const LIVENESS_PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// # Summary
/// 一次扇出端点的静态配置：单客户端符号上限、服务端整体符号上限（`None` 表示
/// 不限）、单客户端出站队列容量。
#[derive(Debug, Clone, Copy)]
pub struct FanoutConfig {
    pub per_client_symbol_cap: usize,
    pub server_symbol_cap: Option<usize>,
    pub outbound_queue_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            per_client_symbol_cap: 50,
            server_symbol_cap: None,
            outbound_queue_capacity: 256,
        }
    }
}

struct ClientEntry {
    queue: Arc<OutboundQueue>,
    symbols: HashSet<String>,
}

/// # Summary
/// 符号 -> 订阅它的客户端集合索引，供上游逐笔行情到来时快速定位需要投递的
/// 客户端，避免对每条行情遍历全部连接。
#[derive(Default)]
struct SymbolIndex {
    by_symbol: HashMap<String, HashSet<ClientId>>,
}

impl SymbolIndex {
    fn add(&mut self, symbol: &str, client: ClientId) {
        self.by_symbol.entry(symbol.to_string()).or_default().insert(client);
    }

    fn remove(&mut self, symbol: &str, client: ClientId) {
        if let Some(set) = self.by_symbol.get_mut(symbol) {
            set.remove(&client);
            if set.is_empty() {
                self.by_symbol.remove(symbol);
            }
        }
    }

    fn subscribers(&self, symbol: &str) -> Option<&HashSet<ClientId>> {
        self.by_symbol.get(symbol)
    }

    fn distinct_symbol_count(&self) -> usize {
        self.by_symbol.len()
    }
}

/// # Summary
/// WebSocket 扇出多路复用器：接住上游 [`TradeStreamClient`] 的逐笔行情流，
/// 按客户端的订阅关系分发到各自的有界出站队列。
///
/// # Invariants
/// - 单个客户端的订阅符号数不超过 `config.per_client_symbol_cap`。
/// - 若 `config.server_symbol_cap` 为 `Some(n)`，服务端整体去重后的订阅符号
///   数不超过 `n`；超限的新订阅请求被拒绝（不影响已有订阅）。
/// - 出站队列满载时丢弃队首消息而不是断开客户端或阻塞上游广播循环。
pub struct Fanout<C: TradeStreamClient> {
    name: String,
    client: Arc<C>,
    config: FanoutConfig,
    clients: RwLock<HashMap<ClientId, ClientEntry>>,
    index: RwLock<SymbolIndex>,
    next_id: AtomicU64,
    rejected_subscriptions: AtomicU64,
}

impl<C: TradeStreamClient + 'static> Fanout<C> {
    pub fn new(name: impl Into<String>, client: Arc<C>, config: FanoutConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            client,
            config,
            clients: RwLock::new(HashMap::new()),
            index: RwLock::new(SymbolIndex::default()),
            next_id: AtomicU64::new(1),
            rejected_subscriptions: AtomicU64::new(0),
        })
    }

    /// 注册一个新连接的客户端，返回它的 `ClientId` 和出站队列句柄。
    pub fn register(&self) -> (ClientId, Arc<OutboundQueue>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(OutboundQueue::new(self.config.outbound_queue_capacity));
        let mut clients = match self.clients.write() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        clients.insert(
            id,
            ClientEntry {
                queue: queue.clone(),
                symbols: HashSet::new(),
            },
        );
        (id, queue)
    }

    /// # Logic
    /// 清理断开客户端的队列与符号索引残留；对于移除后订阅者集合变空的符号，
    /// 向上游发出取消订阅（spec §4.8 的断开语义）。
    pub async fn disconnect(&self, client: ClientId) {
        let owned_symbols: Vec<String> = {
            let mut clients = match self.clients.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            clients
                .remove(&client)
                .map(|entry| entry.symbols.into_iter().collect())
                .unwrap_or_default()
        };

        let vacated: Vec<Symbol> = {
            let mut index = match self.index.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            let mut vacated = Vec::new();
            for symbol in &owned_symbols {
                index.remove(symbol, client);
                if index.subscribers(symbol).is_none() {
                    if let Ok(s) = Symbol::parse(symbol) {
                        vacated.push(s);
                    }
                }
            }
            vacated
        };

        if !vacated.is_empty() {
            let _ = self.client.unsubscribe(&vacated).await;
        }
    }

    /// # Logic
    /// 解析客户端发来的一条消息并产出零或一条立即回应（订阅确认/拒绝、
    /// pong）。解析失败或语义非法时返回对应的 `WsErrorCode`。
    pub async fn handle_client_message(&self, client: ClientId, raw: &str) -> ServerMessage {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(raw);
        let msg = match parsed {
            Ok(m) => m,
            Err(_) => return ServerMessage::error(WsErrorCode::ParseError, "could not parse message"),
        };

        match msg {
            ClientMessage::Ping => ServerMessage::Pong,
            ClientMessage::Subscribe { symbols } => self.subscribe(client, symbols).await,
            ClientMessage::Unsubscribe { symbols } => self.unsubscribe(client, symbols).await,
        }
    }

    async fn subscribe(&self, client: ClientId, raw_symbols: Vec<String>) -> ServerMessage {
        if raw_symbols.is_empty() {
            return ServerMessage::error(WsErrorCode::BadRequest, "symbols must not be empty");
        }

        let mut parsed = Vec::with_capacity(raw_symbols.len());
        for raw in &raw_symbols {
            match Symbol::parse(raw) {
                Ok(s) => parsed.push(s),
                Err(_) => {
                    return ServerMessage::error(
                        WsErrorCode::InvalidSymbols,
                        format!("invalid symbol: {raw}"),
                    )
                }
            }
        }

        let (current_count, already_owned) = {
            let clients = match self.clients.read() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            match clients.get(&client) {
                Some(entry) => {
                    let owned = parsed.iter().filter(|s| entry.symbols.contains(s.as_str())).count();
                    (entry.symbols.len(), owned)
                }
                None => (0, 0),
            }
        };
        let new_symbols: Vec<&Symbol> = parsed.iter().collect();
        let prospective = current_count + new_symbols.len() - already_owned;
        if prospective > self.config.per_client_symbol_cap {
            self.rejected_subscriptions.fetch_add(1, Ordering::Relaxed);
            return ServerMessage::error(
                WsErrorCode::LimitExceeded,
                format!(
                    "client symbol cap is {}, would exceed with this request",
                    self.config.per_client_symbol_cap
                ),
            );
        }

        if let Some(cap) = self.config.server_symbol_cap {
            let index = match self.index.read() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            let already_tracked = new_symbols
                .iter()
                .filter(|s| index.subscribers(s.as_str()).is_some())
                .count();
            let net_new = new_symbols.len() - already_tracked;
            if index.distinct_symbol_count() + net_new > cap {
                drop(index);
                self.rejected_subscriptions.fetch_add(1, Ordering::Relaxed);
                return ServerMessage::error(
                    WsErrorCode::LimitExceeded,
                    format!("server symbol cap is {cap}"),
                );
            }
        }

        let first_interest: Vec<Symbol> = {
            let mut index = match self.index.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            let first_interest: Vec<Symbol> = parsed
                .iter()
                .filter(|s| index.subscribers(s.as_str()).is_none())
                .cloned()
                .collect();
            for s in &parsed {
                index.add(s.as_str(), client);
            }
            first_interest
        };

        if !first_interest.is_empty() {
            if let Err(err) = self.client.subscribe(&first_interest).await {
                warn!(fanout = %self.name, error = %err, "upstream subscribe failed");
            }
        }

        {
            let mut clients = match self.clients.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            if let Some(entry) = clients.get_mut(&client) {
                for s in &parsed {
                    entry.symbols.insert(s.as_str().to_string());
                }
            }
        }

        ServerMessage::Subscribed {
            symbols: parsed.iter().map(|s| s.as_str().to_string()).collect(),
        }
    }

    async fn unsubscribe(&self, client: ClientId, raw_symbols: Vec<String>) -> ServerMessage {
        if raw_symbols.is_empty() {
            return ServerMessage::error(WsErrorCode::BadRequest, "symbols must not be empty");
        }
        let mut parsed = Vec::with_capacity(raw_symbols.len());
        for raw in &raw_symbols {
            match Symbol::parse(raw) {
                Ok(s) => parsed.push(s),
                Err(_) => {
                    return ServerMessage::error(
                        WsErrorCode::InvalidSymbols,
                        format!("invalid symbol: {raw}"),
                    )
                }
            }
        }

        {
            let mut clients = match self.clients.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            if let Some(entry) = clients.get_mut(&client) {
                for s in &parsed {
                    entry.symbols.remove(s.as_str());
                }
            }
        }
        let last_departure: Vec<Symbol> = {
            let mut index = match self.index.write() {
                Ok(g) => g,
                Err(p) => p.into_inner(),
            };
            let mut vacated = Vec::new();
            for s in &parsed {
                index.remove(s.as_str(), client);
                if index.subscribers(s.as_str()).is_none() {
                    vacated.push(s.clone());
                }
            }
            vacated
        };

        if !last_departure.is_empty() {
            let _ = self.client.unsubscribe(&last_departure).await;
        }

        ServerMessage::Unsubscribed {
            symbols: parsed.iter().map(|s| s.as_str().to_string()).collect(),
        }
    }

    /// 将一条上游行情投递给所有订阅了该符号的客户端出站队列。
    fn dispatch_tick(&self, tick: &tickerflow_core::market::entity::Tick) {
        let index = match self.index.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let Some(subscribers) = index.subscribers(tick.symbol.as_str()) else {
            return;
        };
        let message = ServerMessage::from_tick(tick).to_json();
        let clients = match self.clients.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        for client_id in subscribers {
            if let Some(entry) = clients.get(client_id) {
                let before = entry.queue.len();
                entry.queue.push(message.clone());
                if entry.queue.dropped_count() > 0 && entry.queue.len() == before {
                    debug!(client = client_id, fanout = %self.name, "outbound queue dropped oldest tick");
                }
            }
        }
    }

    /// 消费上游行情流直至其结束（连接断开由上游监督者处理，这里只负责扇出）。
    pub async fn spawn_tick_loop(self: &Arc<Self>) {
        let mut stream = self.client.stream();
        while let Some(item) = stream.next().await {
            match item {
                Ok(tick) => self.dispatch_tick(&tick),
                Err(err) => {
                    warn!(fanout = %self.name, error = %err, "upstream tick stream error");
                }
            }
        }
    }

    pub fn client_count(&self) -> usize {
        let clients = match self.clients.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        clients.len()
    }

    pub fn distinct_symbol_count(&self) -> usize {
        let index = match self.index.read() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        index.distinct_symbol_count()
    }
}

impl<C: TradeStreamClient + 'static> Health for Fanout<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn health(&self) -> ComponentHealth {
        ComponentHealth {
            name: self.name.clone(),
            healthy: true,
            circuit: None,
            detail: Some(format!(
                "clients={} symbols={} rejected_subscriptions={}",
                self.client_count(),
                self.distinct_symbol_count(),
                self.rejected_subscriptions.load(Ordering::Relaxed)
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream::BoxStream;
    use std::sync::Mutex as StdMutex;
    use tickerflow_core::market::entity::Tick;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    struct FakeTradeClient {
        subscribed: StdMutex<HashSet<String>>,
        tx: mpsc::Sender<Result<Tick, CoreError>>,
        rx: StdMutex<Option<mpsc::Receiver<Result<Tick, CoreError>>>>,
    }

    impl FakeTradeClient {
        fn new() -> Arc<Self> {
            let (tx, rx) = mpsc::channel(64);
            Arc::new(Self {
                subscribed: StdMutex::new(HashSet::new()),
                tx,
                rx: StdMutex::new(Some(rx)),
            })
        }

        fn push_tick(&self, symbol: &str, price: f64) {
            let tick = Tick {
                symbol: Symbol::parse(symbol).unwrap(),
                price,
                change_24h: None,
                change_percent_24h: None,
                high_24h: None,
                low_24h: None,
                volume_24h: None,
                timestamp: Utc::now(),
            };
            let _ = self.tx.try_send(Ok(tick));
        }
    }

    #[async_trait]
    impl TradeStreamClient for FakeTradeClient {
        async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError> {
            let mut g = self.subscribed.lock().unwrap();
            for s in symbols {
                g.insert(s.as_str().to_string());
            }
            Ok(())
        }

        async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), CoreError> {
            let mut g = self.subscribed.lock().unwrap();
            for s in symbols {
                g.remove(s.as_str());
            }
            Ok(())
        }

        fn stream(&self) -> BoxStream<'static, Result<Tick, CoreError>> {
            let rx = self.rx.lock().unwrap().take().expect("stream taken twice in test");
            Box::pin(ReceiverStream::new(rx))
        }
    }

    fn fanout(config: FanoutConfig) -> (Arc<Fanout<FakeTradeClient>>, Arc<FakeTradeClient>) {
        let client = FakeTradeClient::new();
        let fanout = Fanout::new("trade-stream", client.clone(), config);
        (fanout, client)
    }

    #[tokio::test]
    async fn subscribe_routes_tick_to_subscribed_client_only() {
        let (fanout, upstream) = fanout(FanoutConfig::default());
        let (client_a, queue_a) = fanout.register();
        let (_client_b, queue_b) = fanout.register();

        let resp = fanout
            .handle_client_message(client_a, r#"{"type":"subscribe","symbols":["BTCUSDT"]}"#)
            .await;
        assert!(matches!(resp, ServerMessage::Subscribed { .. }));

        upstream.push_tick("BTCUSDT", 42.0);
        let tick_loop = fanout.clone();
        tokio::spawn(async move { tick_loop.spawn_tick_loop().await });

        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), queue_a.recv())
            .await
            .unwrap();
        assert!(msg.contains("42"));
        assert!(queue_b.is_empty());
    }

    #[tokio::test]
    async fn subscribe_rejects_beyond_per_client_cap() {
        let (fanout, _upstream) = fanout(FanoutConfig {
            per_client_symbol_cap: 1,
            ..FanoutConfig::default()
        });
        let (client, _queue) = fanout.register();
        let _ = fanout
            .handle_client_message(client, r#"{"type":"subscribe","symbols":["AAA"]}"#)
            .await;
        let resp = fanout
            .handle_client_message(client, r#"{"type":"subscribe","symbols":["BBB"]}"#)
            .await;
        match resp {
            ServerMessage::Error { code, .. } => assert_eq!(code, WsErrorCode::LimitExceeded),
            other => panic!("expected limit-exceeded error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_beyond_server_wide_cap() {
        let (fanout, _upstream) = fanout(FanoutConfig {
            server_symbol_cap: Some(1),
            ..FanoutConfig::default()
        });
        let (client_a, _q_a) = fanout.register();
        let (client_b, _q_b) = fanout.register();
        let first = fanout
            .handle_client_message(client_a, r#"{"type":"subscribe","symbols":["AAA"]}"#)
            .await;
        assert!(matches!(first, ServerMessage::Subscribed { .. }));
        let second = fanout
            .handle_client_message(client_b, r#"{"type":"subscribe","symbols":["BBB"]}"#)
            .await;
        match second {
            ServerMessage::Error { code, .. } => assert_eq!(code, WsErrorCode::LimitExceeded),
            other => panic!("expected limit-exceeded error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_removes_client_from_symbol_index() {
        let (fanout, _upstream) = fanout(FanoutConfig::default());
        let (client, _queue) = fanout.register();
        let _ = fanout
            .handle_client_message(client, r#"{"type":"subscribe","symbols":["AAA"]}"#)
            .await;
        assert_eq!(fanout.distinct_symbol_count(), 1);
        let resp = fanout
            .handle_client_message(client, r#"{"type":"unsubscribe","symbols":["AAA"]}"#)
            .await;
        assert!(matches!(resp, ServerMessage::Unsubscribed { .. }));
        assert_eq!(fanout.distinct_symbol_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_clears_client_from_index_and_map() {
        let (fanout, _upstream) = fanout(FanoutConfig::default());
        let (client, _queue) = fanout.register();
        let _ = fanout
            .handle_client_message(client, r#"{"type":"subscribe","symbols":["AAA"]}"#)
            .await;
        fanout.disconnect(client).await;
        assert_eq!(fanout.client_count(), 0);
        assert_eq!(fanout.distinct_symbol_count(), 0);
    }

    #[tokio::test]
    async fn malformed_message_returns_parse_error() {
        let (fanout, _upstream) = fanout(FanoutConfig::default());
        let (client, _queue) = fanout.register();
        let resp = fanout.handle_client_message(client, "not json").await;
        match resp {
            ServerMessage::Error { code, .. } => assert_eq!(code, WsErrorCode::ParseError),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_returns_pong() {
        let (fanout, _upstream) = fanout(FanoutConfig::default());
        let (client, _queue) = fanout.register();
        let resp = fanout.handle_client_message(client, r#"{"type":"ping"}"#).await;
        assert!(matches!(resp, ServerMessage::Pong));
    }
}
