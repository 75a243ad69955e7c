//! Wires the Event Source Adapter, Request Correlator, Classification &
//! Statistics Engine, and Report Sink into the single-threaded cooperative
//! pipeline described in the concurrency & resource model: one task owns
//! the poll loop, processes whatever `poll` hands back, and returns to
//! `poll` — the only suspension point.

use std::io::Write;
use std::time::{Duration, Instant};

use ioamp_common::{EventKind, Layer, LayerEvent};
use log::{debug, info, warn};

use crate::classifier::{self, compute_amplification, StatsTable};
use crate::config::{ClassificationConfig, ReportConfig, StragglerPolicyConfig};
use crate::correlator::Correlator;
use crate::error::{IoAmpError, Termination};
use crate::metrics::Metrics;
use crate::sink::{ReportSink, Summary};
use crate::source::{EventSource, PollOutcome};

/// How long one `poll` call is allowed to wait before the pipeline checks
/// cancellation/deadline again. Independent of the producer's own
/// behavior — real and synthetic sources alike return promptly.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The result of a completed pipeline run: how it ended, and the exact
/// summary data the termination report was rendered from — tests assert
/// on this struct's fields rather than on rendered text (§8).
pub struct PipelineOutcome {
    pub termination: Termination,
    pub summary: Summary,
}

pub struct Pipeline<W: Write> {
    source: Box<dyn EventSource + Send>,
    correlator: Correlator,
    stats: StatsTable,
    sink: ReportSink<W>,
    metrics: Metrics,
    classification_cfg: ClassificationConfig,
    straggler_cfg: StragglerPolicyConfig,
    report_cfg: ReportConfig,
    correlate: bool,
    last_event_ts: u64,
}

impl<W: Write> Pipeline<W> {
    pub fn new(
        source: Box<dyn EventSource + Send>,
        correlator: Correlator,
        sink: ReportSink<W>,
        classification_cfg: ClassificationConfig,
        straggler_cfg: StragglerPolicyConfig,
        report_cfg: ReportConfig,
        correlate: bool,
    ) -> Self {
        Self {
            source,
            correlator,
            stats: StatsTable::default(),
            sink,
            metrics: Metrics::new(),
            classification_cfg,
            straggler_cfg,
            report_cfg,
            correlate,
            last_event_ts: 0,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Drive the pipeline to completion. `duration` bounds the run (`None`
    /// means until signaled or until a finite source — demo/test — is
    /// exhausted). Cancellation is a raced future so it can interrupt a
    /// blocked `poll` promptly, matching the concurrency model's
    /// suspension-point contract.
    pub async fn run(
        &mut self,
        duration: Option<Duration>,
        mut cancel: impl std::future::Future<Output = ()> + Unpin,
    ) -> Result<PipelineOutcome, IoAmpError> {
        let deadline = duration.map(|d| Instant::now() + d);
        let mut rollup_tick = tokio::time::interval(Duration::from_secs(1));

        let termination = loop {
            if self.source.is_finished() {
                info!("demo source exhausted, shutting down");
                break Termination::Completed;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    info!("duration bound reached, shutting down");
                    break Termination::Completed;
                }
            }

            let mut batch = Vec::new();
            let poll_result = self.source.poll(POLL_TIMEOUT, &mut batch);

            let pacing = match poll_result {
                Ok(PollOutcome::EventsDelivered(n)) => {
                    self.metrics.record_poll(n);
                    for event in batch.drain(..) {
                        self.process_event(event);
                    }
                    Duration::ZERO
                }
                Ok(PollOutcome::TimedOut) => {
                    self.metrics.record_poll(0);
                    POLL_TIMEOUT
                }
                Ok(PollOutcome::Interrupted) => break Termination::Interrupted,
                Err(e) => {
                    warn!("fatal: source error: {e}");
                    return Err(IoAmpError::ProducerUnavailable(e.to_string()));
                }
            };

            tokio::select! {
                biased;
                _ = &mut cancel => {
                    info!("cancellation received, draining and shutting down");
                    break Termination::Interrupted;
                }
                _ = rollup_tick.tick() => {
                    self.metrics.rollup();
                    self.metrics.set_active_contexts(self.correlator.active_context_count());
                    self.metrics.set_tracked_requests(self.correlator.tracked_request_count());
                    self.metrics.set_branch_journal_len(self.correlator.branch_journal_len());
                }
                _ = tokio::time::sleep(pacing) => {}
            }
        };

        self.correlator.drain_on_shutdown(self.last_event_ts.saturating_add(1));
        let summary = self.build_summary();
        self.sink
            .write_summary(&summary)
            .map_err(IoAmpError::SinkWrite)?;
        info!(
            "shutdown complete: events={} requests={} evictions={}",
            self.stats.total_events(),
            summary.top_requests.len(),
            summary.evicted_requests
        );

        Ok(PipelineOutcome { termination, summary })
    }

    fn process_event(&mut self, mut event: LayerEvent) {
        self.last_event_ts = self.last_event_ts.max(event.timestamp);

        // Only consulted under deferred device-byte accounting
        // (`!count_unmatched_bio_submit_as_device_bytes`): `Some(true)` means
        // this `BioComplete` resolved a matching submit whose bytes were
        // withheld at submit time and should land now; `Some(false)` means
        // no submit matched and the bytes are dropped, not double-counted
        // later. `None` (the default config) leaves byte accounting at
        // `DevBioSubmit`, where it already happens unconditionally.
        let mut bytes_on_complete = None;
        if event.event_kind == EventKind::DevBioComplete {
            if event.latency_ns == 0 {
                if let Some(elapsed) = self.correlator.resolve_bio_completion(&event) {
                    event.latency_ns = elapsed;
                    if !self.straggler_cfg.count_unmatched_bio_submit_as_device_bytes {
                        bytes_on_complete = Some(true);
                    }
                } else if !self.straggler_cfg.count_unmatched_bio_submit_as_device_bytes {
                    bytes_on_complete = Some(false);
                }
            } else if !self.straggler_cfg.count_unmatched_bio_submit_as_device_bytes {
                // Latency already known (e.g. producer-supplied), but the
                // timer table still needs clearing so a future resubmission
                // on the same block isn't mistaken for an outstanding one.
                bytes_on_complete = Some(self.correlator.resolve_bio_completion(&event).is_some());
            }
        } else if event.event_kind == EventKind::DevBioSubmit {
            let _ = self.correlator.resolve_bio_completion(&event);
        }

        let outcome = self.correlator.process(&event);
        if event.layer == Layer::Application {
            // Every Application-layer record here already carries a
            // `retval`, i.e. it is observed at syscall return, not entry —
            // so the context it belongs to is already past "exit" and the
            // straggler grace window opens immediately, renewed by each
            // subsequent branch on the same thread.
            self.correlator.mark_exit(event.thread_id, event.timestamp);
        }
        let flags = classifier::classify(&event, &self.classification_cfg);
        classifier::record_stats(
            &mut self.stats,
            &event,
            &flags,
            &self.classification_cfg,
            &self.straggler_cfg,
            outcome.ancestor_is_workload,
            bytes_on_complete,
        );

        if self.correlate && outcome.request_id != 0 && !outcome.straggler {
            if let Some(rollup) = self.correlator.rollup_mut(outcome.request_id) {
                classifier::update_rollup(
                    rollup,
                    &event,
                    &flags,
                    &self.classification_cfg,
                    &self.straggler_cfg,
                    bytes_on_complete,
                );
            }
        }

        debug!(
            "{} {} req={:x} size={} aligned={}",
            event.layer.name(),
            event.event_kind.name(),
            outcome.request_id,
            event.size_bytes,
            event.effective_aligned_bytes(),
        );

        let is_workload_related = matches!(
            event.event_kind,
            EventKind::AppObjectGet | EventKind::AppObjectPut
        ) || outcome.ancestor_is_workload;

        if !self.report_cfg.workload_only || is_workload_related {
            if let Err(e) = self.sink.write_record(&event, &flags, &outcome) {
                warn!("fatal: sink write failure: {e}");
            }
        }
    }

    fn build_summary(&self) -> Summary {
        let breakdown = compute_amplification(&self.stats);
        let top_n = if self.correlate { self.report_cfg.top_n } else { 0 };
        let rollups = self.correlator.rollups().cloned();
        Summary::build(
            &self.stats,
            &breakdown,
            rollups,
            top_n,
            self.source.dropped_by_producer(),
            self.source.unknown_dropped(),
            self.correlator.late_events,
            self.correlator.evicted_requests,
            self.correlator.evicted_contexts,
            self.correlator.unattributed_events,
        )
    }
}
