use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

/// # Summary
/// 有界并发限流器：至多 `concurrency` 个操作同时执行，其余提交 FIFO 排队；
/// 完成一个即放行队首。
///
/// # Invariants
/// - `concurrency >= 1`。
/// - 取消由调用方丢弃返回的 future 实现；已经开始运行的任务会跑到完成，
///   本类型不做任何工作重排。
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    pending: AtomicUsize,
}

impl ConcurrencyLimiter {
    pub fn new(concurrency: usize) -> Self {
        assert!(concurrency >= 1, "concurrency must be at least 1");
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            active: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
        }
    }

    /// 排队等待一个许可，然后运行 `f`，在许可持有期间计入 `active_count`。
    pub async fn submit<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore is never closed");
        self.pending.fetch_sub(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        let result = f().await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        result
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// # Summary
/// 在 [`ConcurrencyLimiter`] 之上附加"连续两次启动之间的最小间隔"约束。
///
/// # Logic
/// `lastStart` 在工作**真正开始**（拿到许可之后）时更新，而不是在提交时——
/// 这样排队等待许可的时间不会被计入节流窗口。
pub struct ThrottledLimiter {
    inner: ConcurrencyLimiter,
    min_delay: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl ThrottledLimiter {
    pub fn new(concurrency: usize, min_delay: Duration) -> Self {
        Self {
            inner: ConcurrencyLimiter::new(concurrency),
            min_delay,
            last_start: Mutex::new(None),
        }
    }

    pub async fn submit<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.inner
            .submit(|| async {
                self.wait_for_slot().await;
                f().await
            })
            .await
    }

    async fn wait_for_slot(&self) {
        let mut last_start = self.last_start.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last_start {
            let elapsed = now.saturating_duration_since(prev);
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last_start = Some(Instant::now());
    }

    pub fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrency_limiter_caps_simultaneous_work() {
        let limiter = Arc::new(ConcurrencyLimiter::new(2));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .submit(|| async {
                        let current = limiter.active_count();
                        peak.fetch_max(current, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_limiter_spaces_out_successive_starts() {
        let limiter = Arc::new(ThrottledLimiter::new(4, Duration::from_millis(100)));
        let starts = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..3 {
            let limiter = limiter.clone();
            let starts = starts.clone();
            limiter
                .submit(|| async move {
                    starts.lock().await.push(tokio::time::Instant::now());
                })
                .await;
        }

        let starts = starts.lock().await;
        assert_eq!(starts.len(), 3);
        assert!(starts[1].duration_since(starts[0]) >= Duration::from_millis(100));
        assert!(starts[2].duration_since(starts[1]) >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn active_and_pending_counts_settle_back_to_zero() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.submit(|| async {}).await;
        assert_eq!(limiter.active_count(), 0);
        assert_eq!(limiter.pending_count(), 0);
    }
}
