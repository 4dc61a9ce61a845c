use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters for degraded paths and exchange outcomes
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    store_fetch_failures: AtomicU64,
    store_commit_failures: AtomicU64,
    store_delete_failures: AtomicU64,
    registry_failures: AtomicU64,
    exchanges_started: AtomicU64,
    exchanges_completed: AtomicU64,
    exchanges_failed: AtomicU64,
    exchanges_cancelled: AtomicU64,
    attachments_unreadable: AtomicU64,
    images_redacted: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub store_fetch_failures: u64,
    pub store_commit_failures: u64,
    pub store_delete_failures: u64,
    pub registry_failures: u64,
    pub exchanges_started: u64,
    pub exchanges_completed: u64,
    pub exchanges_failed: u64,
    pub exchanges_cancelled: u64,
    pub attachments_unreadable: u64,
    pub images_redacted: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_store_fetch_failures(&self) {
        self.inner.store_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_commit_failures(&self) {
        self.inner.store_commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_delete_failures(&self) {
        self.inner.store_delete_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_registry_failures(&self) {
        self.inner.registry_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exchanges_started(&self) {
        self.inner.exchanges_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exchanges_completed(&self) {
        self.inner.exchanges_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exchanges_failed(&self) {
        self.inner.exchanges_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_exchanges_cancelled(&self) {
        self.inner.exchanges_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_attachments_unreadable(&self) {
        self.inner.attachments_unreadable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_images_redacted(&self, count: u64) {
        self.inner.images_redacted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            store_fetch_failures: inner.store_fetch_failures.load(Ordering::Relaxed),
            store_commit_failures: inner.store_commit_failures.load(Ordering::Relaxed),
            store_delete_failures: inner.store_delete_failures.load(Ordering::Relaxed),
            registry_failures: inner.registry_failures.load(Ordering::Relaxed),
            exchanges_started: inner.exchanges_started.load(Ordering::Relaxed),
            exchanges_completed: inner.exchanges_completed.load(Ordering::Relaxed),
            exchanges_failed: inner.exchanges_failed.load(Ordering::Relaxed),
            exchanges_cancelled: inner.exchanges_cancelled.load(Ordering::Relaxed),
            attachments_unreadable: inner.attachments_unreadable.load(Ordering::Relaxed),
            images_redacted: inner.images_redacted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();

        clone.increment_store_fetch_failures();
        clone.add_images_redacted(3);
        metrics.increment_exchanges_started();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.store_fetch_failures, 1);
        assert_eq!(snapshot.images_redacted, 3);
        assert_eq!(snapshot.exchanges_started, 1);
        assert_eq!(snapshot.exchanges_failed, 0);
    }
}
