//! # tickerflow-cache
//!
//! 带 TTL、陈旧读取窗口与近似 LRU 容量淘汰的内存缓存，供各 Provider Service
//! 各自持有一份。

pub mod sweeper;
pub mod ttl;

pub use sweeper::{spawn_sweeper, SweepHandle};
pub use ttl::{CacheEntry, Staleness, TtlCache};
