use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// # Summary
/// 单飞合并器：同一个 key 同时只允许一次真正的请求在途；并发调用者共享同一
/// 个结果（成功或失败）。
///
/// # Invariants
/// - 注册必须是原子的"查一下有没有，没有就插入"，否则并发调用者可能各自
///   触发一次 `fn`，破坏单飞语义。实现用一把锁守护 `HashMap` 来获得这个原子性。
/// - 结果一旦 settle（无论成功失败）立刻从表中移除，不会残留陈旧的 flight。
/// - 错误类型 `E` 必须 `Clone`——结果通过 broadcast channel 分发给所有等待者，
///   原始错误（包括其 `code()`）被原样保留，不会被擦除成字符串。
pub struct Coalescer<T, E = tickerflow_core::error::CoreError>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inflight: Mutex<HashMap<String, broadcast::Sender<Result<T, E>>>>,
    inflight_count: AtomicUsize,
}

impl<T, E> Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            inflight_count: AtomicUsize::new(0),
        }
    }

    /// 当前真正在途（非等待中）的飞行数量，供 `/metrics` 汇报使用。
    pub fn inflight_count(&self) -> usize {
        self.inflight_count.load(Ordering::Relaxed)
    }

    /// 若 `key` 已有飞行中的调用，等待并共享其结果；否则发起一次新的 `fn`。
    pub async fn run<F, Fut>(&self, key: &str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<FlightLost>,
    {
        let mut guard = self.inflight.lock().await;
        if let Some(tx) = guard.get(key) {
            let mut rx = tx.subscribe();
            drop(guard);
            return rx.recv().await.unwrap_or_else(|_| Err(FlightLost.into()));
        }

        let (tx, _rx) = broadcast::channel(1);
        guard.insert(key.to_string(), tx.clone());
        drop(guard);
        self.inflight_count.fetch_add(1, Ordering::Relaxed);

        let outcome = f().await;

        let mut guard = self.inflight.lock().await;
        guard.remove(key);
        drop(guard);
        self.inflight_count.fetch_sub(1, Ordering::Relaxed);

        let _ = tx.send(outcome.clone());
        outcome
    }
}

/// 飞行在 settle 前被 Drop（所有发送端都消失）时返回的哨兵错误。正常路径下
/// 绝不会出现——`run` 总在移除注册之前 `send`。
#[derive(Debug, Clone, Copy)]
pub struct FlightLost;

impl std::fmt::Display for FlightLost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("coalesced flight dropped without a result")
    }
}

impl From<FlightLost> for tickerflow_core::error::CoreError {
    fn from(_: FlightLost) -> Self {
        tickerflow_core::error::CoreError::Internal(FlightLost.to_string())
    }
}

impl<T, E> Default for Coalescer<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
