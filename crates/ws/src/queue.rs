use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// # Summary
/// 单个客户端的有界出站消息队列，满载时丢弃队首（最旧）的消息而不是拒绝新消息。
///
/// # Invariants
/// - 队列长度不超过 `capacity`。
/// - 每次丢弃都会计入 `dropped`，供健康/指标上报使用。
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// # Logic
    /// 1. 获取内部锁并尝试追加一条消息。
    /// 2. 若已达容量上限，先从队首弹出最旧的一条并计数，再追加新消息。
    /// 3. 唤醒等待中的 `recv` 调用。
    pub fn push(&self, message: String) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        guard.push_back(message);
        drop(guard);
        self.notify.notify_one();
    }

    /// 阻塞直到队列中至少有一条消息，然后取出最旧的一条。
    pub async fn recv(&self) -> String {
        loop {
            {
                let mut guard = match self.inner.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(msg) = guard.pop_front() {
                    return msg;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_recv_returns_message_in_fifo_order() {
        let q = OutboundQueue::new(4);
        q.push("a".to_string());
        q.push("b".to_string());
        assert_eq!(q.recv().await, "a");
        assert_eq!(q.recv().await, "b");
    }

    #[tokio::test]
    async fn push_beyond_capacity_drops_oldest() {
        let q = OutboundQueue::new(2);
        q.push("a".to_string());
        q.push("b".to_string());
        q.push("c".to_string());
        assert_eq!(q.dropped_count(), 1);
        assert_eq!(q.recv().await, "b");
        assert_eq!(q.recv().await, "c");
    }

    #[tokio::test]
    async fn recv_waits_for_a_message_to_arrive() {
        let q = std::sync::Arc::new(OutboundQueue::new(4));
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        q.push("late".to_string());
        let msg = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg, "late");
    }

    #[test]
    fn len_and_is_empty_reflect_queue_state() {
        let q = OutboundQueue::new(4);
        assert!(q.is_empty());
        q.push("a".to_string());
        assert_eq!(q.len(), 1);
        assert!(!q.is_empty());
    }
}
