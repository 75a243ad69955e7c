use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-level health counters, separate from the domain-level
/// `LayerStats`/`RequestRollup` the classifier maintains: this describes how
/// the pipeline itself is doing (poll cadence, table occupancy), never the
/// I/O it observed.
pub struct Metrics {
    start: Instant,
    polls_total: AtomicU64,
    events_this_sec: AtomicU64,
    events_per_sec: AtomicU64,
    events_total: AtomicU64,
    timed_out_polls: AtomicU64,
    active_contexts: AtomicU64,
    tracked_requests: AtomicU64,
    branch_journal_len: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            polls_total: AtomicU64::new(0),
            events_this_sec: AtomicU64::new(0),
            events_per_sec: AtomicU64::new(0),
            events_total: AtomicU64::new(0),
            timed_out_polls: AtomicU64::new(0),
            active_contexts: AtomicU64::new(0),
            tracked_requests: AtomicU64::new(0),
            branch_journal_len: AtomicU64::new(0),
        }
    }

    pub fn record_poll(&self, delivered: usize) {
        self.polls_total.fetch_add(1, Ordering::Relaxed);
        if delivered == 0 {
            self.timed_out_polls.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.events_this_sec
            .fetch_add(delivered as u64, Ordering::Relaxed);
        self.events_total
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    /// Called periodically (not per-event) to refresh the events/sec gauge.
    pub fn rollup(&self) {
        let per_sec = self.events_this_sec.swap(0, Ordering::Relaxed);
        self.events_per_sec.store(per_sec, Ordering::Relaxed);
    }

    pub fn events_per_sec(&self) -> u64 {
        self.events_per_sec.load(Ordering::Relaxed)
    }

    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    pub fn polls_total(&self) -> u64 {
        self.polls_total.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn set_active_contexts(&self, n: usize) {
        self.active_contexts.store(n as u64, Ordering::Relaxed);
    }

    pub fn active_contexts(&self) -> u64 {
        self.active_contexts.load(Ordering::Relaxed)
    }

    pub fn set_tracked_requests(&self, n: usize) {
        self.tracked_requests.store(n as u64, Ordering::Relaxed);
    }

    pub fn tracked_requests(&self) -> u64 {
        self.tracked_requests.load(Ordering::Relaxed)
    }

    pub fn set_branch_journal_len(&self, n: usize) {
        self.branch_journal_len.store(n as u64, Ordering::Relaxed);
    }

    pub fn branch_journal_len(&self) -> u64 {
        self.branch_journal_len.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_polls_count_as_timeouts_not_events() {
        let m = Metrics::new();
        m.record_poll(0);
        m.record_poll(0);
        m.record_poll(3);
        assert_eq!(m.events_total(), 3);
        assert_eq!(m.polls_total(), 3);
    }

    #[test]
    fn rollup_resets_the_per_second_window() {
        let m = Metrics::new();
        m.record_poll(5);
        m.rollup();
        assert_eq!(m.events_per_sec(), 5);
        m.rollup();
        assert_eq!(m.events_per_sec(), 0);
    }
}
