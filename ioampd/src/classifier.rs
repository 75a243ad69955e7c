//! Classification & Statistics Engine: derives classification flags the
//! source didn't provide, maintains per-layer running counters, and computes
//! amplification factors at report time.

use ioamp_common::{ClassificationFlags, EventKind, Layer, LayerEvent};

use crate::config::{ClassificationConfig, StragglerPolicyConfig};
use crate::correlator::RequestRollup;

/// Per-layer running counters (data model §`LayerStats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LayerStats {
    pub events: u64,
    pub bytes: u64,
    pub aligned_bytes: u64,
    pub metadata_ops: u64,
    pub journal_ops: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub latency_sum_ns: u64,
    pub workload_events: u64,
    pub workload_bytes: u64,
    pub sidecar_ops: u64,
    pub erasure_writes: u64,
}

/// The five per-layer counter blocks, indexed by [`Layer::index`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsTable {
    layers: [LayerStats; 5],
}

impl StatsTable {
    pub fn get(&self, layer: Layer) -> &LayerStats {
        &self.layers[layer.index()]
    }

    pub fn get_mut(&mut self, layer: Layer) -> &mut LayerStats {
        &mut self.layers[layer.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Layer, &LayerStats)> {
        Layer::ALL.into_iter().map(move |l| (l, self.get(l)))
    }

    pub fn total_events(&self) -> u64 {
        self.layers.iter().map(|s| s.events).sum()
    }
}

/// Classification is applied left-to-right, first match wins for the
/// mutually-exclusive filename-derived flags; the layer/kind-derived flags
/// and the producer-supplied `cache_hit` hint are additive. Re-running this
/// on an already-classified event is a no-op: flags are only ever OR'd in,
/// never cleared (idempotence, invariant 6 of the testable properties).
pub fn classify(event: &LayerEvent, cfg: &ClassificationConfig) -> ClassificationFlags {
    let mut flags = event.flags;

    if cfg
        .metadata_filename_suffixes
        .iter()
        .any(|suffix| event.filename.ends_with(suffix.as_str()))
    {
        flags.is_sidecar = true;
        flags.is_metadata = true;
    } else if cfg
        .erasure_shard_patterns
        .iter()
        .any(|pat| event.filename.contains(pat.as_str()))
        || ends_with_numeric_part_suffix(&event.filename)
    {
        flags.is_erasure_shard = true;
    } else if event.layer == Layer::Filesystem
        && matches!(
            event.event_kind,
            EventKind::FsJournalWrite | EventKind::FsInodeUpdate | EventKind::FsSync
        )
    {
        flags.is_metadata = true;
        if event.event_kind == EventKind::FsJournalWrite {
            flags.is_journal = true;
        }
    } else if event.layer == Layer::Device
        && event.event_kind == EventKind::DevBioSubmit
        && event.size_bytes <= cfg.journal_device_threshold_bytes
    {
        // A small device write below the threshold is a journal commit,
        // and a journal commit is itself metadata (§9 open question:
        // `account_metadata_in_device_bytes`).
        flags.is_journal = true;
        flags.is_metadata = true;
    }

    if event.layer == Layer::OperatingSystem && event.event_kind == EventKind::OsPageCacheHit {
        flags.cache_hit = true;
    }

    flags
}

fn ends_with_numeric_part_suffix(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => !ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Whether an event originates from, or descends from (via `request_id`),
/// an `ObjectGet`/`ObjectPut` — the workload tally only counts these.
fn is_workload_event(event: &LayerEvent, ancestor_is_workload: bool) -> bool {
    ancestor_is_workload
        || matches!(
            event.event_kind,
            EventKind::AppObjectGet | EventKind::AppObjectPut
        )
}

/// Whether one event's bytes should land in the device-bytes total used for
/// amplification, resolving both Open Questions of design note §9:
///
/// - `BioComplete` closes out the timer its matching `BioSubmit` opened and
///   only refines `latency_ns` by default — the bytes were already counted
///   at submit, so counting them again here would double them. With
///   `count_unmatched_bio_submit_as_device_bytes = false`, accounting is
///   deferred instead: a submit's bytes land only once its matching
///   complete confirms the write actually happened, via `bytes_on_complete`.
/// - A device-layer event flagged `is_metadata` (a journal commit under the
///   threshold) is excluded when `account_metadata_in_device_bytes = false`.
fn counts_device_bytes(
    event: &LayerEvent,
    flags: &ClassificationFlags,
    classification_cfg: &ClassificationConfig,
    straggler_cfg: &StragglerPolicyConfig,
    bytes_on_complete: Option<bool>,
) -> bool {
    if event.layer == Layer::Device && event.event_kind == EventKind::DevBioComplete {
        return bytes_on_complete.unwrap_or(false);
    }
    if event.layer == Layer::Device
        && event.event_kind == EventKind::DevBioSubmit
        && !straggler_cfg.count_unmatched_bio_submit_as_device_bytes
    {
        return false;
    }
    if event.layer == Layer::Device
        && flags.is_metadata
        && !classification_cfg.account_metadata_in_device_bytes
    {
        return false;
    }
    true
}

/// Update the running per-layer counters for one event. `ancestor_is_workload`
/// comes from the correlator's rollup (if any) so descendants of a workload
/// root are tallied even though their own `event_kind` isn't an object op.
/// `bytes_on_complete` is only consulted for `DevBioComplete` under deferred
/// accounting (see [`counts_device_bytes`]); pass `None` when the producer
/// default (count at submit) applies.
pub fn record_stats(
    table: &mut StatsTable,
    event: &LayerEvent,
    flags: &ClassificationFlags,
    classification_cfg: &ClassificationConfig,
    straggler_cfg: &StragglerPolicyConfig,
    ancestor_is_workload: bool,
    bytes_on_complete: Option<bool>,
) {
    let counts_bytes = counts_device_bytes(
        event,
        flags,
        classification_cfg,
        straggler_cfg,
        bytes_on_complete,
    );
    let stats = table.get_mut(event.layer);
    stats.events += 1;
    if counts_bytes {
        stats.bytes += event.size_bytes;
        stats.aligned_bytes += event.effective_aligned_bytes();
    }
    if flags.is_metadata {
        stats.metadata_ops += 1;
    }
    if flags.is_journal {
        stats.journal_ops += 1;
    }
    if flags.cache_hit {
        stats.cache_hits += 1;
    }
    if event.event_kind == EventKind::OsPageCacheMiss {
        stats.cache_misses += 1;
    }
    if flags.is_sidecar {
        stats.sidecar_ops += 1;
    }
    if event.event_kind == EventKind::SvcErasureWrite || flags.is_erasure_shard {
        stats.erasure_writes += 1;
    }
    stats.latency_sum_ns += event.latency_ns;

    if is_workload_event(event, ancestor_is_workload) {
        stats.workload_events += 1;
        if counts_bytes {
            stats.workload_bytes += event.size_bytes;
        }
    }
}

/// Fold one event into its request's rollup once the correlator has
/// resolved a non-zero `request_id` for it. `bytes_on_complete` mirrors the
/// parameter of the same name on [`record_stats`].
pub fn update_rollup(
    rollup: &mut RequestRollup,
    event: &LayerEvent,
    flags: &ClassificationFlags,
    classification_cfg: &ClassificationConfig,
    straggler_cfg: &StragglerPolicyConfig,
    bytes_on_complete: Option<bool>,
) {
    let idx = event.layer.index();
    if counts_device_bytes(
        event,
        flags,
        classification_cfg,
        straggler_cfg,
        bytes_on_complete,
    ) {
        rollup.per_layer_bytes[idx] += event.size_bytes;
        rollup.per_layer_aligned_bytes[idx] += event.effective_aligned_bytes();
    }

    match event.event_kind {
        EventKind::OsVfsRead => rollup.vfs_reads += 1,
        EventKind::OsVfsWrite => rollup.vfs_writes += 1,
        EventKind::DevBioSubmit => rollup.bio_submits += 1,
        EventKind::SvcReplication => rollup.replication_factor += 1,
        // One shard write is one erasure branch; the matching VFS write a
        // layer down is the same branch, not a second one.
        EventKind::SvcErasureWrite if flags.is_erasure_shard => rollup.erasure_branches += 1,
        _ => {}
    }
    if flags.is_journal {
        rollup.journal_ops += 1;
    }
    if flags.is_metadata {
        rollup.metadata_ops += 1;
    }
    rollup.end_ts = rollup.end_ts.max(event.timestamp);
}

/// A layer's amplification factor relative to `Application` bytes, or
/// `None` when undefined (`app_bytes == 0`) — never reported as zero.
pub type Amplification = Option<f64>;

#[derive(Debug, Clone, Copy)]
pub struct AmplificationBreakdown {
    pub app_bytes: u64,
    pub storage_service_bytes: u64,
    pub os_bytes: u64,
    pub fs_bytes: u64,
    pub dev_bytes: u64,
    pub per_layer: [Amplification; 5],
    pub total: Amplification,
}

/// Per layer-to-Application factor `= layer_bytes / app_bytes`; total uses
/// the first non-zero of device, filesystem, OS bytes as `final_bytes`.
pub fn compute_amplification(table: &StatsTable) -> AmplificationBreakdown {
    let app_bytes = table.get(Layer::Application).bytes;
    let storage_service_bytes = table.get(Layer::StorageService).aligned_bytes;
    let os_bytes = table.get(Layer::OperatingSystem).aligned_bytes;
    let fs_bytes = table.get(Layer::Filesystem).aligned_bytes;
    let dev_bytes = table.get(Layer::Device).bytes;

    let factor = |bytes: u64| -> Amplification {
        if app_bytes > 0 {
            Some(bytes as f64 / app_bytes as f64)
        } else {
            None
        }
    };

    let mut per_layer = [None; 5];
    per_layer[Layer::Application.index()] = factor(app_bytes);
    per_layer[Layer::StorageService.index()] = factor(storage_service_bytes);
    per_layer[Layer::OperatingSystem.index()] = factor(os_bytes);
    per_layer[Layer::Filesystem.index()] = factor(fs_bytes);
    per_layer[Layer::Device.index()] = factor(dev_bytes);

    let final_bytes = [dev_bytes, fs_bytes, os_bytes]
        .into_iter()
        .find(|&b| b != 0)
        .unwrap_or(0);

    AmplificationBreakdown {
        app_bytes,
        storage_service_bytes,
        os_bytes,
        fs_bytes,
        dev_bytes,
        per_layer,
        total: factor(final_bytes),
    }
}

/// Per-request amplification, same definition as [`compute_amplification`]
/// applied to a single [`RequestRollup`].
pub fn request_amplification(rollup: &RequestRollup) -> Amplification {
    let app_bytes = rollup.per_layer_bytes[Layer::Application.index()];
    if app_bytes == 0 {
        return None;
    }
    let dev = rollup.per_layer_aligned_bytes[Layer::Device.index()];
    let fs = rollup.per_layer_aligned_bytes[Layer::Filesystem.index()];
    let os = rollup.per_layer_aligned_bytes[Layer::OperatingSystem.index()];
    let final_bytes = [dev, fs, os].into_iter().find(|&b| b != 0).unwrap_or(0);
    Some(final_bytes as f64 / app_bytes as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioamp_common::SystemType;

    fn event(layer: Layer, kind: EventKind, size: u64, aligned: u64) -> LayerEvent {
        LayerEvent {
            timestamp: 0,
            process_id: 1,
            thread_id: 1,
            layer,
            event_kind: kind,
            system_type: SystemType::Generic,
            size_bytes: size,
            offset_bytes: 0,
            latency_ns: 0,
            device_major: 0,
            device_minor: 0,
            retval: 0,
            inode: 0,
            request_id: 0,
            parent_request_id: 0,
            branch_id: 0,
            branch_count: 0,
            process_name: String::new(),
            filename: String::new(),
            aligned_size_bytes: aligned,
            replication_count: 0,
            block_count: 0,
            flags: ClassificationFlags::default(),
        }
    }

    #[test]
    fn xl_meta_filename_is_sidecar_and_metadata() {
        let cfg = ClassificationConfig::default();
        let mut e = event(Layer::StorageService, EventKind::SvcXlMeta, 0, 0);
        e.filename = "bucket/obj/xl.meta".to_string();
        let flags = classify(&e, &cfg);
        assert!(flags.is_sidecar);
        assert!(flags.is_metadata);
    }

    #[test]
    fn small_bio_submit_is_classified_as_journal() {
        let cfg = ClassificationConfig::default();
        let e = event(Layer::Device, EventKind::DevBioSubmit, 4096, 4096);
        let flags = classify(&e, &cfg);
        assert!(flags.is_journal);
    }

    #[test]
    fn classification_is_idempotent() {
        let cfg = ClassificationConfig::default();
        let mut e = event(Layer::Filesystem, EventKind::FsJournalWrite, 4096, 4096);
        e.flags = classify(&e, &cfg);
        let reclassified = classify(&e, &cfg);
        assert_eq!(reclassified, e.flags);
    }

    #[test]
    fn app_bytes_zero_reports_na_not_zero() {
        let mut table = StatsTable::default();
        table.get_mut(Layer::Device).bytes = 4096;
        let breakdown = compute_amplification(&table);
        assert_eq!(breakdown.total, None);
        assert_eq!(breakdown.per_layer[Layer::Application.index()], None);
    }

    #[test]
    fn scenario_single_small_sync_write() {
        let cfg = ClassificationConfig::default();
        let straggler_cfg = StragglerPolicyConfig::default();
        let mut table = StatsTable::default();

        let events = [
            event(Layer::Application, EventKind::AppWrite, 100, 0),
            event(Layer::OperatingSystem, EventKind::OsVfsWrite, 100, 4096),
            event(Layer::Filesystem, EventKind::FsJournalWrite, 4096, 4096),
            event(Layer::Device, EventKind::DevBioSubmit, 4096, 4096),
        ];
        for e in &events {
            let flags = classify(e, &cfg);
            record_stats(&mut table, e, &flags, &cfg, &straggler_cfg, false, None);
        }

        let breakdown = compute_amplification(&table);
        assert_eq!(breakdown.app_bytes, 100);
        assert_eq!(breakdown.os_bytes, 4096);
        assert_eq!(breakdown.fs_bytes, 4096);
        assert_eq!(breakdown.dev_bytes, 4096);
        assert!((breakdown.total.unwrap() - 40.96).abs() < 1e-9);
    }
}
