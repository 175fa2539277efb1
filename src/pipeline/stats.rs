//! Pipeline counters shared between the ingestion and publisher tasks

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    decode_errors: AtomicU64,
    ignored: AtomicU64,
    accepted: AtomicU64,
    late_events: AtomicU64,
    windows_sealed: AtomicU64,
    windows_discarded: AtomicU64,
    results_published: AtomicU64,
    publish_retries: AtomicU64,
    publish_failures: AtomicU64,
    results_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_errors: u64,
    pub ignored: u64,
    pub accepted: u64,
    pub late_events: u64,
    pub windows_sealed: u64,
    pub windows_discarded: u64,
    pub results_published: u64,
    pub publish_retries: u64,
    pub publish_failures: u64,
    /// Results lost before reaching the publisher (backlog overflow, publisher gone)
    pub results_dropped: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "received={} accepted={} ignored={} decode_errors={} late={} sealed={} discarded={} published={} retries={} publish_failures={} dropped={}",
            self.received,
            self.accepted,
            self.ignored,
            self.decode_errors,
            self.late_events,
            self.windows_sealed,
            self.windows_discarded,
            self.results_published,
            self.publish_retries,
            self.publish_failures,
            self.results_dropped,
        )
    }
}

macro_rules! counter {
    ($record:ident, $field:ident) => {
        pub fn $record(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_received, received);
    counter!(record_decode_errors, decode_errors);
    counter!(record_ignored, ignored);
    counter!(record_accepted, accepted);
    counter!(record_late_events, late_events);
    counter!(record_windows_sealed, windows_sealed);
    counter!(record_windows_discarded, windows_discarded);
    counter!(record_published, results_published);
    counter!(record_publish_retries, publish_retries);
    counter!(record_publish_failures, publish_failures);
    counter!(record_results_dropped, results_dropped);

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            late_events: self.late_events.load(Ordering::Relaxed),
            windows_sealed: self.windows_sealed.load(Ordering::Relaxed),
            windows_discarded: self.windows_discarded.load(Ordering::Relaxed),
            results_published: self.results_published.load(Ordering::Relaxed),
            publish_retries: self.publish_retries.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
        }
    }
}
