use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tickerflow_core::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
enum State {
    Closed,
    Open { opened_at: Instant },
    HalfOpen,
}

/// # Summary
/// 保护一个具名上游的断路器：`Closed -> Open -> HalfOpen -> Closed/Open` 状态机。
///
/// # Invariants
/// - `Closed` 下连续失败次数达到 `failure_threshold` 才跳到 `Open`。
/// - `Open` 下，冷却时间 `recovery_timeout` 过去之前的每次调用都被拒绝，
///   不会被放行，也不会扣减计数。
/// - `HalfOpen` 下探测调用若失败，立即回到 `Open` 并重置 `opened_at`；
///   实现允许同时放行多个探测，但绝不能因为阈值而错误拒绝。
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    consecutive_failures: AtomicU32,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_timeout,
            consecutive_failures: AtomicU32::new(0),
            state: Mutex::new(State::Closed),
        }
    }

    /// 在调用上游之前检查是否放行。`Open` 且冷却未到时返回
    /// `CoreError::CircuitOpen`；冷却已到则转入 `HalfOpen` 并放行。
    pub fn check(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.recovery_timeout {
                    *state = State::HalfOpen;
                    Ok(())
                } else {
                    let retry_after_ms = (self.recovery_timeout - elapsed).as_millis() as u64;
                    Err(CoreError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after_ms,
                    })
                }
            }
        }
    }

    /// 记录一次成功：`Closed` 下重置失败计数；`HalfOpen` 下关闭断路器。
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = State::Closed;
    }

    /// 记录一次失败：`Closed` 下累计失败计数，越过阈值则跳到 `Open`；
    /// `HalfOpen` 下立即回到 `Open` 并重置冷却计时。
    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            State::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.failure_threshold {
                    *state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen => {
                *state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// 在断路器保护下执行 `f`：被拒绝时返回 `CircuitOpen` 而不调用 `f`；
    /// 否则执行并据结果更新状态机。
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        self.check()?;
        match f().await {
            Ok(v) => {
                self.record_success();
                Ok(v)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            State::Open { .. }
        )
    }

    /// 将内部以 [`Instant`] 计时的状态翻译为对外暴露的
    /// [`tickerflow_core::health::CircuitState`]（以挂钟时间表达 `opened_at`）。
    pub fn state_snapshot(&self) -> tickerflow_core::health::CircuitState {
        use tickerflow_core::health::CircuitState;
        match *self.state.lock().unwrap_or_else(|e| e.into_inner()) {
            State::Closed => CircuitState::Closed,
            State::HalfOpen => CircuitState::HalfOpen,
            State::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                let opened_at_wall = chrono::Utc::now()
                    - chrono::Duration::from_std(elapsed).unwrap_or_default();
                CircuitState::Open {
                    opened_at: opened_at_wall,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing<'a>() -> impl std::future::Future<Output = Result<(), CoreError>> + 'a {
        async { Err(CoreError::ProviderError("boom".into())) }
    }

    #[tokio::test]
    async fn opens_after_reaching_failure_threshold() {
        let cb = CircuitBreaker::new("binance", 3, Duration::from_secs(60));
        for _ in 0..3 {
            let _ = cb.execute(failing).await;
        }
        assert!(cb.is_open());
    }

    #[tokio::test]
    async fn rejects_calls_while_open_and_reports_retry_after() {
        let cb = CircuitBreaker::new("binance", 1, Duration::from_secs(60));
        let _ = cb.execute(failing).await;
        assert!(cb.is_open());
        let err = cb.check().unwrap_err();
        match err {
            CoreError::CircuitOpen { retry_after_ms, .. } => assert!(retry_after_ms > 0),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_timer() {
        let cb = CircuitBreaker::new("binance", 1, Duration::from_millis(10));
        cb.record_failure();
        assert!(cb.is_open());
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.check().is_ok());
        cb.record_failure();
        assert!(cb.is_open());
    }

    #[test]
    fn half_open_success_closes_the_circuit() {
        let cb = CircuitBreaker::new("binance", 1, Duration::from_millis(10));
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.check().is_ok());
        cb.record_success();
        assert!(!cb.is_open());
        for _ in 0..1 {
            assert!(cb.check().is_ok());
        }
    }

    #[test]
    fn success_in_closed_state_resets_consecutive_failures() {
        let cb = CircuitBreaker::new("binance", 3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        assert!(!cb.is_open());
    }
}
