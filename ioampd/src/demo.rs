//! Synthetic event generator (ambient test tooling).
//!
//! The real probe producer is out of scope for this core. `DemoSource`
//! implements the same [`crate::source::EventSource`] trait the real
//! ring-buffer adapter does, so the rest of the pipeline — Correlator,
//! Classification & Statistics Engine, Report Sink — cannot tell a demo
//! run from a real one. It deterministically replays the literal
//! end-to-end scenarios plus a couple of longer synthetic profiles, each
//! event carrying a scheduled offset from the run's start so `--demo` can
//! pace real-time-feeling output without the pipeline code knowing it's
//! talking to a generator rather than a kernel probe.

use std::time::{Duration, Instant};

use clap::ValueEnum;
use ioamp_common::{ClassificationFlags, EventKind, Layer, LayerEvent, SystemType};

use crate::source::{EventSource, PollOutcome, SourceError};

/// The demo scenarios selectable with `--demo <scenario>`. Each of the six
/// numbered variants corresponds to the like-numbered literal scenario;
/// `Burst` and `Trickle` are longer synthetic profiles, not literal
/// scenarios, useful for exercising resource bounds and eviction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum DemoScenario {
    SmallSyncWrite,
    CleanWrite,
    ErasurePut,
    CachedReadVsWrite,
    ProducerDrops,
    Straggler,
    Burst,
    Trickle,
}

impl DemoScenario {
    pub fn name(self) -> &'static str {
        match self {
            DemoScenario::SmallSyncWrite => "small-sync-write",
            DemoScenario::CleanWrite => "clean-write",
            DemoScenario::ErasurePut => "erasure-put",
            DemoScenario::CachedReadVsWrite => "cached-read-vs-write",
            DemoScenario::ProducerDrops => "producer-drops",
            DemoScenario::Straggler => "straggler",
            DemoScenario::Burst => "burst",
            DemoScenario::Trickle => "trickle",
        }
    }
}

fn base_event(thread_id: u64, ts: u64, layer: Layer, kind: EventKind, size: u64) -> LayerEvent {
    LayerEvent {
        timestamp: ts,
        process_id: 1000 + (thread_id as u32),
        thread_id,
        layer,
        event_kind: kind,
        system_type: SystemType::MinIo,
        size_bytes: size,
        offset_bytes: 0,
        latency_ns: 0,
        device_major: 8,
        device_minor: 1,
        retval: 0,
        inode: 42,
        request_id: 0,
        parent_request_id: 0,
        branch_id: 0,
        branch_count: 0,
        process_name: "minio".to_string(),
        filename: String::new(),
        aligned_size_bytes: 0,
        replication_count: 0,
        block_count: 0,
        flags: ClassificationFlags::default(),
    }
}

/// §8 scenario 1: a 100-byte O_SYNC write that journals a whole 4 KiB page.
fn scenario_small_sync_write() -> Vec<(u64, LayerEvent)> {
    vec![
        (0, base_event(1, 0, Layer::Application, EventKind::AppWrite, 100)),
        (0, {
            let mut e = base_event(1, 1_000, Layer::OperatingSystem, EventKind::OsVfsWrite, 100);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(1, 2_000, Layer::Filesystem, EventKind::FsJournalWrite, 4096);
            e.aligned_size_bytes = 4096;
            e.flags.is_journal = true;
            e
        }),
        (0, {
            let mut e = base_event(1, 3_000, Layer::Device, EventKind::DevBioSubmit, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(1, 123_000, Layer::Device, EventKind::DevBioComplete, 4096);
            e.aligned_size_bytes = 4096;
            e.latency_ns = 120_000;
            e
        }),
    ]
}

/// §8 scenario 2: a 4 KiB write to a clean file, amplification ~1.0x.
fn scenario_clean_write() -> Vec<(u64, LayerEvent)> {
    vec![
        (0, base_event(2, 0, Layer::Application, EventKind::AppWrite, 4096)),
        (0, {
            let mut e = base_event(2, 1_000, Layer::OperatingSystem, EventKind::OsVfsWrite, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(2, 2_000, Layer::Device, EventKind::DevBioSubmit, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(2, 40_000, Layer::Device, EventKind::DevBioComplete, 4096);
            e.aligned_size_bytes = 4096;
            e.latency_ns = 38_000;
            e
        }),
    ]
}

/// §8 scenario 3: a 1 MiB `ObjectPut` fanning out into a 4+2 erasure set.
/// Shard writes attribute to the single root request because they are
/// deeper-layer (OS/device) events on the same thread, not new
/// application-layer branches — see `correlator::Correlator`.
fn scenario_erasure_put() -> Vec<(u64, LayerEvent)> {
    let mut events = Vec::new();
    events.push((
        0,
        base_event(3, 0, Layer::Application, EventKind::AppObjectPut, 1_048_576),
    ));

    for shard in 0..6u64 {
        let base_ts = 1_000 + shard * 1_000;
        let mut svc = base_event(3, base_ts, Layer::StorageService, EventKind::SvcErasureWrite, 262_144);
        svc.filename = format!("bucket/obj/part.{shard}");
        svc.flags.is_erasure_shard = true;
        events.push((0, svc));

        let mut meta = base_event(3, base_ts + 100, Layer::StorageService, EventKind::SvcXlMeta, 512);
        meta.filename = "bucket/obj/xl.meta".to_string();
        meta.flags.is_metadata = true;
        meta.flags.is_sidecar = true;
        events.push((0, meta));

        let mut os = base_event(3, base_ts + 200, Layer::OperatingSystem, EventKind::OsVfsWrite, 262_144);
        os.aligned_size_bytes = 262_144;
        os.filename = format!("bucket/obj/part.{shard}");
        os.flags.is_erasure_shard = true;
        events.push((0, os));

        let mut submit = base_event(3, base_ts + 300, Layer::Device, EventKind::DevBioSubmit, 262_144);
        submit.aligned_size_bytes = 262_144;
        submit.offset_bytes = shard * 262_144;
        events.push((0, submit));

        let mut complete = base_event(3, base_ts + 300 + 40_000, Layer::Device, EventKind::DevBioComplete, 262_144);
        complete.aligned_size_bytes = 262_144;
        complete.offset_bytes = shard * 262_144;
        complete.latency_ns = 40_000;
        events.push((0, complete));
    }

    events
}

/// §8 scenario 4: two interleaved threads, one cached read, one write.
fn scenario_cached_read_vs_write() -> Vec<(u64, LayerEvent)> {
    vec![
        (0, base_event(10, 0, Layer::Application, EventKind::AppRead, 4096)),
        (0, {
            let mut e = base_event(10, 500, Layer::OperatingSystem, EventKind::OsPageCacheHit, 4096);
            e.aligned_size_bytes = 0;
            e.flags.cache_hit = true;
            e
        }),
        (0, base_event(11, 100, Layer::Application, EventKind::AppWrite, 4096)),
        (0, {
            let mut e = base_event(11, 600, Layer::OperatingSystem, EventKind::OsVfsWrite, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(11, 1_200, Layer::Device, EventKind::DevBioSubmit, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
        (0, {
            let mut e = base_event(11, 41_200, Layer::Device, EventKind::DevBioComplete, 4096);
            e.aligned_size_bytes = 4096;
            e.latency_ns = 40_000;
            e
        }),
    ]
}

/// §8 scenario 5: a normal write, but the producer reports 17 dropped
/// ring-buffer overflow events alongside it.
fn scenario_producer_drops() -> Vec<(u64, LayerEvent)> {
    scenario_clean_write()
}

/// §8 scenario 6: an application exit followed 20ms later by a straggling
/// `VfsWrite` on the same thread — past the default 10ms grace window.
fn scenario_straggler() -> Vec<(u64, LayerEvent)> {
    vec![
        (0, base_event(20, 0, Layer::Application, EventKind::AppWrite, 100)),
        (0, {
            let mut e = base_event(20, 20_000_000, Layer::OperatingSystem, EventKind::OsVfsWrite, 4096);
            e.aligned_size_bytes = 4096;
            e
        }),
    ]
}

/// A longer synthetic profile: a steady trickle of small synchronous
/// writes from a handful of threads, spaced out in real time.
fn scenario_trickle(count: usize) -> Vec<(u64, LayerEvent)> {
    let mut events = Vec::new();
    for i in 0..count {
        let thread_id = 100 + (i as u64 % 4);
        let ts = (i as u64) * 50_000;
        let delay_ms = (i as u64) * 25;
        events.push((delay_ms, base_event(thread_id, ts, Layer::Application, EventKind::AppWrite, 512)));
        let mut os = base_event(thread_id, ts + 500, Layer::OperatingSystem, EventKind::OsVfsWrite, 512);
        os.aligned_size_bytes = 4096;
        events.push((delay_ms, os));
        let mut submit = base_event(thread_id, ts + 1_000, Layer::Device, EventKind::DevBioSubmit, 4096);
        submit.aligned_size_bytes = 4096;
        events.push((delay_ms, submit));
    }
    events
}

/// A longer synthetic profile: a burst of concurrent object PUTs across
/// many threads, arriving with no inter-event pacing — exercises resource
/// bounds and eviction under load.
fn scenario_burst(count: usize) -> Vec<(u64, LayerEvent)> {
    let mut events = Vec::new();
    for i in 0..count {
        let thread_id = 200 + i as u64;
        let ts = (i as u64) * 10;
        events.push((0, base_event(thread_id, ts, Layer::Application, EventKind::AppObjectPut, 65_536)));
        let mut os = base_event(thread_id, ts + 10, Layer::OperatingSystem, EventKind::OsVfsWrite, 65_536);
        os.aligned_size_bytes = 65_536;
        events.push((0, os));
        let mut submit = base_event(thread_id, ts + 20, Layer::Device, EventKind::DevBioSubmit, 65_536);
        submit.aligned_size_bytes = 65_536;
        events.push((0, submit));
    }
    events
}

pub fn build_scenario(scenario: DemoScenario) -> Vec<(u64, LayerEvent)> {
    match scenario {
        DemoScenario::SmallSyncWrite => scenario_small_sync_write(),
        DemoScenario::CleanWrite => scenario_clean_write(),
        DemoScenario::ErasurePut => scenario_erasure_put(),
        DemoScenario::CachedReadVsWrite => scenario_cached_read_vs_write(),
        DemoScenario::ProducerDrops => scenario_producer_drops(),
        DemoScenario::Straggler => scenario_straggler(),
        DemoScenario::Burst => scenario_burst(64),
        DemoScenario::Trickle => scenario_trickle(40),
    }
}

/// A scheduled, pre-built event stream played back through the
/// `EventSource` boundary. Events are released once their scheduled delay
/// (from the generator's creation) has elapsed; an empty-but-not-yet-done
/// queue reports `TimedOut` like a real idle producer would.
pub struct DemoSource {
    start: Instant,
    scheduled: Vec<(Duration, LayerEvent)>,
    next: usize,
    dropped_by_producer: u64,
}

impl DemoSource {
    pub fn new(scenario: DemoScenario) -> Self {
        let scheduled = build_scenario(scenario)
            .into_iter()
            .map(|(delay_ms, e)| (Duration::from_millis(delay_ms), e))
            .collect();
        let dropped_by_producer = if scenario == DemoScenario::ProducerDrops {
            17
        } else {
            0
        };
        Self {
            start: Instant::now(),
            scheduled,
            next: 0,
            dropped_by_producer,
        }
    }

    /// All scheduled events have been delivered; the demo run is complete.
    pub fn is_exhausted(&self) -> bool {
        self.next >= self.scheduled.len()
    }
}

impl EventSource for DemoSource {
    fn poll(
        &mut self,
        _timeout: Duration,
        out: &mut Vec<LayerEvent>,
    ) -> Result<PollOutcome, SourceError> {
        let elapsed = self.start.elapsed();
        let mut delivered = 0;
        while self.next < self.scheduled.len() && self.scheduled[self.next].0 <= elapsed {
            out.push(self.scheduled[self.next].1.clone());
            self.next += 1;
            delivered += 1;
        }
        if delivered == 0 {
            Ok(PollOutcome::TimedOut)
        } else {
            Ok(PollOutcome::EventsDelivered(delivered))
        }
    }

    fn dropped_by_producer(&self) -> u64 {
        self.dropped_by_producer
    }

    fn is_finished(&self) -> bool {
        self.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sync_write_has_no_pacing_delay() {
        let mut src = DemoSource::new(DemoScenario::SmallSyncWrite);
        let mut out = Vec::new();
        let outcome = src.poll(Duration::from_millis(10), &mut out).unwrap();
        assert_eq!(outcome, PollOutcome::EventsDelivered(5));
        assert!(src.is_exhausted());
    }

    #[test]
    fn producer_drops_scenario_reports_seventeen() {
        let src = DemoSource::new(DemoScenario::ProducerDrops);
        assert_eq!(src.dropped_by_producer(), 17);
    }

    #[test]
    fn trickle_profile_paces_delivery_over_multiple_polls() {
        let mut src = DemoSource::new(DemoScenario::Trickle);
        let mut out = Vec::new();
        let _ = src.poll(Duration::from_millis(10), &mut out).unwrap();
        assert!(!src.is_exhausted());
    }
}
