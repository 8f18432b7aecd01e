//! Process-lifetime counters surfaced by the stats endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

pub const METRIC_DOCUMENT_CACHE_HIT: &str = "specchio_document_cache_hit_total";
pub const METRIC_DOCUMENT_CACHE_MISS: &str = "specchio_document_cache_miss_total";
pub const METRIC_INCLUSION_CACHE_HIT: &str = "specchio_inclusion_cache_hit_total";
pub const METRIC_INCLUSION_CACHE_MISS: &str = "specchio_inclusion_cache_miss_total";
pub const METRIC_UPDATES_PROCESSED: &str = "specchio_updates_processed_total";
pub const METRIC_RENDER_DURATION_MS: &str = "specchio_render_duration_ms";

/// Counters behind `GET /stats`.
///
/// The `metrics` crate carries the same signals to whatever recorder a
/// deployment installs; these atomics exist because the endpoint must read
/// the values back, which `metrics` does not offer.
#[derive(Debug, Default)]
pub struct PreviewStats {
    updates_processed: AtomicU64,
    render_micros_total: AtomicU64,
    document_cache_hits: AtomicU64,
    document_cache_misses: AtomicU64,
    inclusion_cache_hits: AtomicU64,
    inclusion_cache_misses: AtomicU64,
}

impl PreviewStats {
    pub fn record_update(&self, duration: Duration) {
        self.updates_processed.fetch_add(1, Ordering::Relaxed);
        self.render_micros_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_document_cache_hit(&self) {
        self.document_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_document_cache_miss(&self) {
        self.document_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inclusion_cache_hit(&self) {
        self.inclusion_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inclusion_cache_miss(&self) {
        self.inclusion_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn updates_processed(&self) -> u64 {
        self.updates_processed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let updates = self.updates_processed.load(Ordering::Relaxed);
        let total_ms = self.render_micros_total.load(Ordering::Relaxed) as f64 / 1_000.0;
        let average_ms = if updates == 0 {
            0.0
        } else {
            total_ms / updates as f64
        };

        StatsSnapshot {
            updates_processed: updates,
            total_processing_ms: total_ms,
            average_processing_ms: average_ms,
            document_cache: CacheCounters {
                hits: self.document_cache_hits.load(Ordering::Relaxed),
                misses: self.document_cache_misses.load(Ordering::Relaxed),
            },
            inclusion_cache: CacheCounters {
                hits: self.inclusion_cache_hits.load(Ordering::Relaxed),
                misses: self.inclusion_cache_misses.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub updates_processed: u64,
    pub total_processing_ms: f64,
    pub average_processing_ms: f64,
    pub document_cache: CacheCounters,
    pub inclusion_cache: CacheCounters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_average_over_updates() {
        let stats = PreviewStats::default();
        stats.record_update(Duration::from_millis(10));
        stats.record_update(Duration::from_millis(30));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.updates_processed, 2);
        assert!((snapshot.total_processing_ms - 40.0).abs() < 0.5);
        assert!((snapshot.average_processing_ms - 20.0).abs() < 0.5);
    }

    #[test]
    fn snapshot_without_updates_has_zero_average() {
        let stats = PreviewStats::default();
        stats.record_document_cache_miss();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.updates_processed, 0);
        assert_eq!(snapshot.average_processing_ms, 0.0);
        assert_eq!(
            snapshot.document_cache,
            CacheCounters { hits: 0, misses: 1 }
        );
    }
}
