use std::sync::RwLock;
use std::time::{Duration, Instant};

/// # Summary
/// 时间供给器接口，用于隔离物理系统时钟。缓存的过期判定、限流器的最近启动
/// 时间戳、断路器的冷却计时都必须经由此接口读取"当前时间"，以便测试用可控
/// 时钟替换真实时钟。
pub trait Clock: Send + Sync {
    /// 获取单调递增的当前时间点。
    fn now(&self) -> Instant;
}

/// 生产环境使用的真实单调时钟。
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// # Summary
/// 测试用可控时钟，允许用例主动推进时间而不必真正 sleep。
///
/// # Invariants
/// - 内部时间只能单调前进，`advance` 不接受负值（类型上由 `Duration` 保证）。
pub struct FakeClock {
    base: Instant,
    offset: RwLock<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: RwLock::new(Duration::ZERO),
        }
    }

    /// 将时钟向前推进 `d`。
    pub fn advance(&self, d: Duration) {
        let mut offset = self.offset.write().unwrap_or_else(|e| e.into_inner());
        *offset += d;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        let offset = self.offset.read().unwrap_or_else(|e| e.into_inner());
        self.base + *offset
    }
}
