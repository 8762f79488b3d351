//! # 行情推送 WebSocket 端点
//!
//! 升级为 WebSocket 后，把客户端连接登记到 [`tickerflow_ws::Fanout`]：一个
//! task 把出站队列里的消息、以及周期性的存活 ping 写回 socket，另一个循环读取
//! 客户端帧并转交给 `Fanout::handle_client_message` 处理订阅/取消订阅/心跳。

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tickerflow_core::market::port::TradeStreamClient;
use tickerflow_ws::{Fanout, LIVENESS_PING_INTERVAL};

use crate::server::AppState;

/// `GET /stream/crypto` — 加密货币市场的逐笔行情扇出。
pub async fn crypto_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let fanout = state.crypto_fanout;
    ws.on_upgrade(move |socket| handle_socket(socket, fanout, "connected to crypto price stream"))
}

/// `GET /stream/trades` — 美股/BIST 权益逐笔成交流扇出。
pub async fn trade_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let fanout = state.trade_fanout;
    ws.on_upgrade(move |socket| handle_socket(socket, fanout, "connected to equity trade stream"))
}

/// # Logic
/// 三个并发任务共享一次连接的生命周期：
/// - `outbound`：排空出站队列写回文本帧，同时每 [`LIVENESS_PING_INTERVAL`]
///   发送一次 WS 层 ping 帧，若上一周期内未收到对应 pong 则判定失活并退出。
/// - `inbound`：读取客户端帧，文本帧转交给 `Fanout::handle_client_message`，
///   `Pong` 帧则刷新 `alive` 标记。
/// 任一任务退出都会终止另一个，并同步调用 `Fanout::disconnect` 释放状态
/// （spec §4.8 的断开语义：移除全部符号索引，订阅者集合变空则向上游取消订阅）。
async fn handle_socket<C: TradeStreamClient + 'static>(
    socket: WebSocket,
    fanout: Arc<Fanout<C>>,
    connected_message: &'static str,
) {
    let (client_id, queue) = fanout.register();
    let (mut sender, mut receiver) = socket.split();

    let connected = tickerflow_ws::ServerMessage::Connected {
        message: connected_message.to_string(),
    };
    if sender.send(Message::Text(connected.to_json().into())).await.is_err() {
        fanout.disconnect(client_id).await;
        return;
    }

    let alive = Arc::new(AtomicBool::new(true));

    let outbound_alive = alive.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_ticker = tokio::time::interval(LIVENESS_PING_INTERVAL);
        ping_ticker.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                message = queue.recv() => {
                    if sender.send(Message::Text(message.into())).await.is_err() {
                        break;
                    }
                }
                _ = ping_ticker.tick() => {
                    if !outbound_alive.swap(false, Ordering::SeqCst) {
                        break;
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let inbound_fanout = fanout.clone();
    let inbound_alive = alive.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let _ = inbound_fanout.handle_client_message(client_id, &text).await;
                }
                Message::Pong(_) => {
                    inbound_alive.store(true, Ordering::SeqCst);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    fanout.disconnect(client_id).await;
}
