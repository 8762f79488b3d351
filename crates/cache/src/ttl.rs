use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickerflow_core::common::Clock;

/// # Summary
/// 单条缓存记录，`stored_at`/`expires_at` 均以调用方时钟的单调毫秒为单位。
///
/// # Invariants
/// - `expires_at >= stored_at`，由 [`TtlCache::set`] 保证，本类型不做运行时校验。
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: u64,
    pub expires_at: u64,
}

/// 一次带陈旧标记的读取结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staleness<V> {
    pub value: V,
    pub stale: bool,
}

/// # Summary
/// 带 TTL、可选容量上限与陈旧读取窗口的内存缓存。
///
/// # Invariants
/// - `get` 永不返回已过期的值。
/// - `size()` 统计所有条目，无论是否过期——过期条目只在后台清扫或读取命中时被移除。
/// - 当配置了 `max_size` 时，插入触发的淘汰总是选择 `expires_at` 最小的条目
///   （按到期时间的近似 LRU）。
///
/// # Logic
/// 时间来自注入的 [`Clock`]，而非系统时钟，使得测试可以用
/// [`tickerflow_core::common::FakeClock`] 在不真正睡眠的情况下推进过期判定。
pub struct TtlCache<V: Clone + Send + Sync + 'static> {
    entries: DashMap<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    started_at: std::time::Instant,
    max_size: Option<usize>,
    grace_ms: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    pub fn new(clock: Arc<dyn Clock>, max_size: Option<usize>, grace_ms: u64) -> Self {
        let started_at = clock.now();
        Self {
            entries: DashMap::new(),
            clock,
            started_at,
            max_size,
            grace_ms,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 自创建以来的命中次数，供 `/metrics` 汇报使用。
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// 自创建以来的未命中次数，供 `/metrics` 汇报使用。
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn now_ms(&self) -> u64 {
        self.clock
            .now()
            .saturating_duration_since(self.started_at)
            .as_millis() as u64
    }

    /// 写入一个值，`ttl_ms` 必须大于 0。超出 `max_size` 时淘汰 `expires_at`
    /// 最小的条目腾出空间。
    pub fn set(&self, key: &str, value: V, ttl_ms: u64) {
        debug_assert!(ttl_ms > 0, "ttl_ms must be positive");
        let now = self.now_ms();
        let entry = CacheEntry {
            value,
            stored_at: now,
            expires_at: now.saturating_add(ttl_ms),
        };

        if let Some(max) = self.max_size {
            if self.entries.len() >= max && !self.entries.contains_key(key) {
                self.evict_smallest_expiry();
            }
        }

        self.entries.insert(key.to_string(), entry);
    }

    fn evict_smallest_expiry(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().expires_at)
            .map(|e| e.key().clone());
        if let Some(k) = victim {
            self.entries.remove(&k);
        }
    }

    /// 命中且未过期时返回值；缺失或已过期均视为未命中。
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.now_ms();
        let hit = self.entries.get(key).and_then(|e| {
            if now <= e.expires_at {
                Some(e.value.clone())
            } else {
                None
            }
        });
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// 返回原始三元组，不考虑过期；调用方自行判断新鲜度。
    pub fn get_entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// 新鲜或在 `max_stale_ms` 陈旧窗口内时返回值并标注 `stale`；否则未命中。
    pub fn get_with_stale(&self, key: &str, max_stale_ms: u64) -> Option<Staleness<V>> {
        let now = self.now_ms();
        self.entries.get(key).and_then(|e| {
            if now <= e.expires_at {
                Some(Staleness {
                    value: e.value.clone(),
                    stale: false,
                })
            } else if now <= e.expires_at.saturating_add(max_stale_ms) {
                Some(Staleness {
                    value: e.value.clone(),
                    stale: true,
                })
            } else {
                None
            }
        })
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// 清扫超过 `expires_at + grace_ms` 的条目，返回被移除的数量。由持有者
    /// 的周期性任务调用（参见 [`crate::sweeper::spawn_sweeper`]）。
    pub fn sweep(&self) -> usize {
        let now = self.now_ms();
        let grace = self.grace_ms;
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now > e.value().expires_at.saturating_add(grace))
            .map(|e| e.key().clone())
            .collect();
        let removed = dead.len();
        for k in dead {
            self.entries.remove(&k);
        }
        removed
    }
}

pub fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickerflow_core::common::FakeClock;

    fn cache_with_fake_clock() -> (Arc<FakeClock>, TtlCache<i32>) {
        let clock = Arc::new(FakeClock::new());
        let cache = TtlCache::new(clock.clone(), None, 60_000);
        (clock, cache)
    }

    #[test]
    fn get_misses_on_absent_key() {
        let (_clock, cache) = cache_with_fake_clock();
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn get_returns_fresh_value() {
        let (_clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 10_000);
        assert_eq!(cache.get("a"), Some(1));
    }

    #[test]
    fn get_misses_after_expiry() {
        let (clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 1_000);
        clock.advance(Duration::from_millis(1_001));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn get_with_stale_returns_stale_flag_within_window() {
        let (clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 1_000);
        clock.advance(Duration::from_millis(1_500));
        let result = cache.get_with_stale("a", 5_000).unwrap();
        assert_eq!(result.value, 1);
        assert!(result.stale);
    }

    #[test]
    fn get_with_stale_misses_beyond_stale_window() {
        let (clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 1_000);
        clock.advance(Duration::from_millis(10_000));
        assert_eq!(cache.get_with_stale("a", 5_000), None);
    }

    #[test]
    fn size_counts_entries_regardless_of_expiry() {
        let (clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 1_000);
        clock.advance(Duration::from_millis(2_000));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn sweep_removes_only_entries_past_grace() {
        let (clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 1_000);
        cache.set("b", 2, 100_000);
        clock.advance(Duration::from_millis(62_000));
        let removed = cache.sweep();
        assert_eq!(removed, 1);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get_entry("a"), None);
        assert!(cache.get_entry("b").is_some());
    }

    #[test]
    fn bounded_cache_evicts_smallest_expiry_first() {
        let clock = Arc::new(FakeClock::new());
        let cache = TtlCache::new(clock.clone(), Some(2), 60_000);
        cache.set("a", 1, 1_000);
        cache.set("b", 2, 50_000);
        cache.set("c", 3, 10_000);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn delete_and_clear_remove_entries() {
        let (_clock, cache) = cache_with_fake_clock();
        cache.set("a", 1, 10_000);
        cache.delete("a");
        assert_eq!(cache.get("a"), None);
        cache.set("b", 2, 10_000);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }
}
