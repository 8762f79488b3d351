use crate::ttl::TtlCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// # Summary
/// 后台周期性清扫任务的句柄。`Drop` 不会自动停止任务——调用方必须显式
/// `shutdown()`，镜像核心对缓存生命周期提出的 `destroy` 约定。
pub struct SweepHandle {
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// 中止后台清扫循环并清空底层缓存，对应资源释放语义中的 `destroy`。
    pub fn shutdown<V: Clone + Send + Sync + 'static>(self, cache: &TtlCache<V>) {
        self.task.abort();
        cache.clear();
    }
}

/// 以 `interval` 周期调用 `cache.sweep()`，直到返回的句柄被 `shutdown`。
/// 清扫是尽力而为：单次清扫的结果只用于日志，不影响 `get` 的正确性。
pub fn spawn_sweeper<V: Clone + Send + Sync + 'static>(
    cache: Arc<TtlCache<V>>,
    interval: Duration,
) -> SweepHandle {
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = cache.sweep();
            if removed > 0 {
                tracing::debug!(removed, "ttl cache sweep removed expired entries");
            }
        }
    });
    SweepHandle { task }
}
