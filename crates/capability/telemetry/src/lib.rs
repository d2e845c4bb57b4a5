//! 追踪初始化与网关计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 网关计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_in: u64,
    pub queue_in_failed: u64,
    pub queue_out: u64,
    pub queue_out_failed: u64,
    pub frame_discard: u64,
    pub cache_spilled: u64,
    pub cache_replayed: u64,
    pub cache_expired: u64,
    pub rule_success: u64,
    pub rule_failed: u64,
}

/// 网关计数器：单调递增，reset 为显式操作。
pub struct GatewayMetrics {
    queue_in: AtomicU64,
    queue_in_failed: AtomicU64,
    queue_out: AtomicU64,
    queue_out_failed: AtomicU64,
    frame_discard: AtomicU64,
    cache_spilled: AtomicU64,
    cache_replayed: AtomicU64,
    cache_expired: AtomicU64,
    rule_success: AtomicU64,
    rule_failed: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self {
            queue_in: AtomicU64::new(0),
            queue_in_failed: AtomicU64::new(0),
            queue_out: AtomicU64::new(0),
            queue_out_failed: AtomicU64::new(0),
            frame_discard: AtomicU64::new(0),
            cache_spilled: AtomicU64::new(0),
            cache_replayed: AtomicU64::new(0),
            cache_expired: AtomicU64::new(0),
            rule_success: AtomicU64::new(0),
            rule_failed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_in: self.queue_in.load(Ordering::Relaxed),
            queue_in_failed: self.queue_in_failed.load(Ordering::Relaxed),
            queue_out: self.queue_out.load(Ordering::Relaxed),
            queue_out_failed: self.queue_out_failed.load(Ordering::Relaxed),
            frame_discard: self.frame_discard.load(Ordering::Relaxed),
            cache_spilled: self.cache_spilled.load(Ordering::Relaxed),
            cache_replayed: self.cache_replayed.load(Ordering::Relaxed),
            cache_expired: self.cache_expired.load(Ordering::Relaxed),
            rule_success: self.rule_success.load(Ordering::Relaxed),
            rule_failed: self.rule_failed.load(Ordering::Relaxed),
        }
    }

    /// 清零全部计数器。测试之间必须调用以避免串扰。
    pub fn reset(&self) {
        self.queue_in.store(0, Ordering::Relaxed);
        self.queue_in_failed.store(0, Ordering::Relaxed);
        self.queue_out.store(0, Ordering::Relaxed);
        self.queue_out_failed.store(0, Ordering::Relaxed);
        self.frame_discard.store(0, Ordering::Relaxed);
        self.cache_spilled.store(0, Ordering::Relaxed);
        self.cache_replayed.store(0, Ordering::Relaxed);
        self.cache_expired.store(0, Ordering::Relaxed);
        self.rule_success.store(0, Ordering::Relaxed);
        self.rule_failed.store(0, Ordering::Relaxed);
    }
}

static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static GatewayMetrics {
    METRICS.get_or_init(GatewayMetrics::new)
}

/// 初始化 tracing（默认 info，RUST_LOG 覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录入队成功。
pub fn record_queue_in() {
    metrics().queue_in.fetch_add(1, Ordering::Relaxed);
}

/// 记录入队溢出丢弃。
pub fn record_queue_in_failed() {
    metrics().queue_in_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录出队投递成功。
pub fn record_queue_out() {
    metrics().queue_out.fetch_add(1, Ordering::Relaxed);
}

/// 记录出队投递失败。
pub fn record_queue_out_failed() {
    metrics().queue_out_failed.fetch_add(1, Ordering::Relaxed);
}

/// 记录坏帧丢弃。
pub fn record_frame_discard() {
    metrics().frame_discard.fetch_add(1, Ordering::Relaxed);
}

/// 记录离线缓存落盘。
pub fn record_cache_spilled() {
    metrics().cache_spilled.fetch_add(1, Ordering::Relaxed);
}

/// 记录离线缓存回放成功。
pub fn record_cache_replayed() {
    metrics().cache_replayed.fetch_add(1, Ordering::Relaxed);
}

/// 记录离线缓存过期淘汰。
pub fn record_cache_expired() {
    metrics().cache_expired.fetch_add(1, Ordering::Relaxed);
}

/// 记录规则链执行成功。
pub fn record_rule_success() {
    metrics().rule_success.fetch_add(1, Ordering::Relaxed);
}

/// 记录规则链执行失败。
pub fn record_rule_failed() {
    metrics().rule_failed.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        metrics().reset();
        record_queue_in();
        record_queue_in();
        record_queue_in_failed();
        let snap = metrics().snapshot();
        assert_eq!(snap.queue_in, 2);
        assert_eq!(snap.queue_in_failed, 1);
        metrics().reset();
        assert_eq!(metrics().snapshot(), MetricsSnapshot::default());
    }
}
