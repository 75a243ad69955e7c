//! Report Sink: renders real-time per-event records and the end-of-run
//! amplification summary, in either `text` or `json` form, to a single
//! output stream chosen once at startup.

use std::io::{self, Write};

use ioamp_common::{ClassificationFlags, Layer, LayerEvent};
use serde::Serialize;

use crate::classifier::{request_amplification, AmplificationBreakdown, RequestRollup, StatsTable};
use crate::config::ReportFormat;
use crate::correlator::CorrelationOutcome;

/// One row of the per-request top-N table.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRow {
    pub request_id: u64,
    pub op_kind: String,
    pub object_name: Option<String>,
    pub per_layer_bytes: [u64; 5],
    pub total_amplification: Option<f64>,
    pub branch_count: u32,
    pub journal_ops: u64,
    pub metadata_ops: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerRow {
    pub layer: String,
    pub events: u64,
    pub bytes: u64,
    pub aligned_bytes: u64,
    pub metadata_ops: u64,
    pub journal_ops: u64,
    pub cache_hits: u64,
    pub amplification: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadSummary {
    pub object_events: u64,
    pub object_bytes: u64,
    pub sidecar_ops: u64,
    pub erasure_shards: u64,
    pub implied_overhead: Option<f64>,
}

/// Everything the termination report is rendered from, gathered once so the
/// `text` and `json` formats are two views of the same data, not two
/// independent renderers.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub layers: Vec<LayerRow>,
    pub app_bytes: u64,
    pub total_amplification: Option<f64>,
    pub final_bytes: u64,
    pub top_requests: Vec<RequestRow>,
    pub workload: Option<WorkloadSummary>,
    pub producer_drops: u64,
    pub unknown_dropped: u64,
    pub late_events: u64,
    pub evicted_requests: u64,
    pub evicted_contexts: u64,
    pub unattributed_events: u64,
}

impl Summary {
    pub fn build(
        table: &StatsTable,
        breakdown: &AmplificationBreakdown,
        rollups: impl Iterator<Item = RequestRollup>,
        top_n: usize,
        producer_drops: u64,
        unknown_dropped: u64,
        late_events: u64,
        evicted_requests: u64,
        evicted_contexts: u64,
        unattributed_events: u64,
    ) -> Self {
        let layers = Layer::ALL
            .into_iter()
            .map(|l| {
                let s = table.get(l);
                LayerRow {
                    layer: l.name().to_string(),
                    events: s.events,
                    bytes: s.bytes,
                    aligned_bytes: s.aligned_bytes,
                    metadata_ops: s.metadata_ops,
                    journal_ops: s.journal_ops,
                    cache_hits: s.cache_hits,
                    amplification: breakdown.per_layer[l.index()],
                }
            })
            .collect();

        let mut rows: Vec<RequestRow> = rollups
            .map(|r| {
                let total = request_amplification(&r);
                RequestRow {
                    request_id: r.request_id,
                    op_kind: r.op_kind.name().to_string(),
                    object_name: r.object_name.clone(),
                    per_layer_bytes: r.per_layer_bytes,
                    total_amplification: total,
                    branch_count: r.branch_count,
                    journal_ops: r.journal_ops,
                    metadata_ops: r.metadata_ops,
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.total_amplification
                .partial_cmp(&a.total_amplification)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        rows.truncate(top_n);

        let app = table.get(Layer::Application);
        let svc = table.get(Layer::StorageService);
        let workload = (app.workload_events > 0).then(|| WorkloadSummary {
            object_events: app.workload_events,
            object_bytes: app.workload_bytes,
            sidecar_ops: svc.sidecar_ops,
            erasure_shards: svc.erasure_writes,
            implied_overhead: breakdown.total,
        });

        let final_bytes = [breakdown.dev_bytes, breakdown.fs_bytes, breakdown.os_bytes]
            .into_iter()
            .find(|&b| b != 0)
            .unwrap_or(0);

        Self {
            layers,
            app_bytes: breakdown.app_bytes,
            total_amplification: breakdown.total,
            final_bytes,
            top_requests: rows,
            workload,
            producer_drops,
            unknown_dropped,
            late_events,
            evicted_requests,
            evicted_contexts,
            unattributed_events,
        }
    }
}

/// Streams the real-time record for one event and, at termination, the
/// summary — both written to the same configured output, line-buffered
/// with an explicit flush after each write so a crash mid-run leaves a
/// readable partial report.
pub struct ReportSink<W: Write> {
    out: W,
    format: ReportFormat,
    realtime: bool,
    verbose: bool,
}

impl<W: Write> ReportSink<W> {
    pub fn new(out: W, format: ReportFormat, realtime: bool, verbose: bool) -> Self {
        Self {
            out,
            format,
            realtime,
            verbose,
        }
    }

    pub fn write_record(
        &mut self,
        event: &LayerEvent,
        flags: &ClassificationFlags,
        correlation: &CorrelationOutcome,
    ) -> io::Result<()> {
        if !self.realtime {
            return Ok(());
        }
        match self.format {
            ReportFormat::Text => self.write_record_text(event, flags, correlation)?,
            ReportFormat::Json => self.write_record_json(event, flags, correlation)?,
        }
        self.out.flush()
    }

    fn write_record_text(
        &mut self,
        event: &LayerEvent,
        flags: &ClassificationFlags,
        correlation: &CorrelationOutcome,
    ) -> io::Result<()> {
        let mut tags = String::new();
        if flags.is_metadata {
            tags.push_str("[META]");
        }
        if flags.is_journal {
            tags.push_str("[JRNL]");
        }
        if flags.is_erasure_shard {
            tags.push_str("[ERASURE]");
        }
        if flags.cache_hit {
            tags.push_str("[CACHE]");
        }
        if flags.is_sidecar {
            tags.push_str("[SIDECAR]");
        }

        let mut corr = String::new();
        if correlation.request_id != 0 {
            corr.push_str(&format!("[REQ:{:x}]", correlation.request_id));
            if correlation.parent_request_id != 0 {
                corr.push_str(&format!(" [CHILD of {:x}]", correlation.parent_request_id));
            }
            corr.push_str(&format!(
                " [BRANCH {}/{}]",
                correlation.branch_id, correlation.branch_count
            ));
        }

        writeln!(
            self.out,
            "{} {} {} size={} aligned={} latency_us={} comm={} {} {}",
            event.timestamp,
            event.layer.name(),
            event.event_kind.name(),
            event.size_bytes,
            event.aligned_size_bytes,
            event.latency_ns / 1_000,
            event.process_name,
            tags,
            corr,
        )?;

        if self.verbose && flags.is_metadata && !event.filename.is_empty() {
            writeln!(self.out, "    filename: {}", event.filename)?;
        }
        Ok(())
    }

    fn write_record_json(
        &mut self,
        event: &LayerEvent,
        flags: &ClassificationFlags,
        correlation: &CorrelationOutcome,
    ) -> io::Result<()> {
        #[derive(Serialize)]
        struct Record<'a> {
            timestamp: u64,
            layer: &'a str,
            event_kind: &'a str,
            size_bytes: u64,
            aligned_size_bytes: u64,
            latency_us: u64,
            process_name: &'a str,
            filename: Option<&'a str>,
            flags: &'a ClassificationFlags,
            request_id: u64,
            parent_request_id: u64,
            branch_id: u32,
            branch_count: u32,
        }
        let record = Record {
            timestamp: event.timestamp,
            layer: event.layer.name(),
            event_kind: event.event_kind.name(),
            size_bytes: event.size_bytes,
            aligned_size_bytes: event.aligned_size_bytes,
            latency_us: event.latency_ns / 1_000,
            process_name: &event.process_name,
            filename: (!event.filename.is_empty()).then_some(event.filename.as_str()),
            flags,
            request_id: correlation.request_id,
            parent_request_id: correlation.parent_request_id,
            branch_id: correlation.branch_id,
            branch_count: correlation.branch_count,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        writeln!(self.out)
    }

    pub fn write_summary(&mut self, summary: &Summary) -> io::Result<()> {
        match self.format {
            ReportFormat::Text => self.write_summary_text(summary)?,
            ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut self.out, summary)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }

    fn write_summary_text(&mut self, summary: &Summary) -> io::Result<()> {
        writeln!(self.out, "I/O AMPLIFICATION ANALYSIS")?;
        writeln!(self.out)?;
        writeln!(
            self.out,
            "{:<12} {:>10} {:>14} {:>14} {:>8} {:>8} {:>8} {:>10}",
            "LAYER", "EVENTS", "BYTES", "ALIGNED", "META", "JRNL", "CACHE", "AMP_FACTOR"
        )?;
        for row in &summary.layers {
            let amp = row
                .amplification
                .map(|a| format!("{a:.2}x"))
                .unwrap_or_else(|| "N/A".to_string());
            writeln!(
                self.out,
                "{:<12} {:>10} {:>14} {:>14} {:>8} {:>8} {:>8} {:>10}",
                row.layer,
                row.events,
                row.bytes,
                row.aligned_bytes,
                row.metadata_ops,
                row.journal_ops,
                row.cache_hits,
                amp,
            )?;
        }
        writeln!(self.out)?;

        writeln!(self.out, "Amplification Breakdown")?;
        writeln!(self.out, "  app_bytes = {}", summary.app_bytes)?;
        for row in &summary.layers {
            if row.layer == "APPLICATION" || row.bytes == 0 {
                continue;
            }
            let amp = row
                .amplification
                .map(|a| format!("{a:.2}x"))
                .unwrap_or_else(|| "N/A".to_string());
            writeln!(self.out, "  {} bytes = {} ({})", row.layer, row.bytes, amp)?;
        }
        match summary.total_amplification {
            Some(total) => writeln!(self.out, "*** TOTAL AMPLIFICATION: {total:.2}x ***")?,
            None => writeln!(self.out, "*** TOTAL AMPLIFICATION: N/A ***")?,
        }
        writeln!(
            self.out,
            "{} bytes written for {} bytes requested",
            summary.final_bytes, summary.app_bytes
        )?;
        writeln!(self.out)?;

        writeln!(
            self.out,
            "{:<20} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "REQUEST_ID", "APP", "STORAGE", "OS", "FS", "DEVICE", "TOTAL_AMP"
        )?;
        for row in &summary.top_requests {
            let amp = row
                .total_amplification
                .map(|a| format!("{a:.2}x"))
                .unwrap_or_else(|| "N/A".to_string());
            writeln!(
                self.out,
                "{:<20x} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} (branches={}, journal_ops={}, metadata_ops={})",
                row.request_id,
                row.per_layer_bytes[Layer::Application.index()],
                row.per_layer_bytes[Layer::StorageService.index()],
                row.per_layer_bytes[Layer::OperatingSystem.index()],
                row.per_layer_bytes[Layer::Filesystem.index()],
                row.per_layer_bytes[Layer::Device.index()],
                amp,
                row.branch_count,
                row.journal_ops,
                row.metadata_ops,
            )?;
        }
        writeln!(self.out)?;

        if let Some(workload) = &summary.workload {
            writeln!(self.out, "Workload")?;
            writeln!(self.out, "  object events: {}", workload.object_events)?;
            writeln!(self.out, "  object bytes: {}", workload.object_bytes)?;
            writeln!(self.out, "  sidecar ops: {}", workload.sidecar_ops)?;
            writeln!(self.out, "  erasure shards: {}", workload.erasure_shards)?;
            let amp = workload
                .implied_overhead
                .map(|a| format!("{a:.2}x"))
                .unwrap_or_else(|| "N/A".to_string());
            writeln!(self.out, "  implied erasure overhead: {amp}")?;
            writeln!(self.out)?;
        }

        writeln!(self.out, "producer drops: {}", summary.producer_drops)?;
        writeln!(self.out, "unknown records dropped: {}", summary.unknown_dropped)?;
        writeln!(self.out, "late events: {}", summary.late_events)?;
        writeln!(self.out, "evicted requests: {}", summary.evicted_requests)?;
        writeln!(self.out, "evicted contexts: {}", summary.evicted_contexts)?;
        writeln!(self.out, "unattributed events: {}", summary.unattributed_events)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::compute_amplification;
    use ioamp_common::EventKind;

    fn rollup(request_id: u64, app: u64, dev: u64) -> RequestRollup {
        let mut per_layer_bytes = [0u64; 5];
        let mut per_layer_aligned_bytes = [0u64; 5];
        per_layer_bytes[Layer::Application.index()] = app;
        per_layer_aligned_bytes[Layer::Device.index()] = dev;
        RequestRollup {
            request_id,
            op_kind: EventKind::AppWrite,
            object_name: None,
            per_layer_bytes,
            per_layer_aligned_bytes,
            vfs_reads: 0,
            vfs_writes: 0,
            bio_submits: 0,
            journal_ops: 0,
            metadata_ops: 0,
            erasure_branches: 0,
            replication_factor: 0,
            branch_count: 1,
            start_ts: 0,
            end_ts: 0,
        }
    }

    #[test]
    fn summary_omits_workload_section_when_no_workload_events() {
        let table = StatsTable::default();
        let breakdown = compute_amplification(&table);
        let summary = Summary::build(
            &table,
            &breakdown,
            std::iter::empty(),
            10,
            0,
            0,
            0,
            0,
            0,
            0,
        );
        assert!(summary.workload.is_none());
    }

    #[test]
    fn top_requests_sorted_by_descending_amplification() {
        let table = StatsTable::default();
        let breakdown = compute_amplification(&table);
        let rollups = vec![rollup(1, 100, 100), rollup(2, 100, 1_000)];
        let summary = Summary::build(
            &table,
            &breakdown,
            rollups.into_iter(),
            10,
            0,
            0,
            0,
            0,
            0,
            0,
        );
        assert_eq!(summary.top_requests[0].request_id, 2);
        assert_eq!(summary.top_requests[1].request_id, 1);
    }

    #[test]
    fn text_report_always_prints_drop_counters_even_at_zero() {
        let table = StatsTable::default();
        let breakdown = compute_amplification(&table);
        let summary = Summary::build(
            &table,
            &breakdown,
            std::iter::empty(),
            10,
            0,
            0,
            0,
            0,
            0,
            0,
        );
        let mut buf = Vec::new();
        let mut sink = ReportSink::new(&mut buf, ReportFormat::Text, true, false);
        sink.write_summary(&summary).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("producer drops: 0"));
        assert!(text.contains("late events: 0"));
    }
}
