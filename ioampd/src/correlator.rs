//! Request Correlator: threads a logical request identity through layer
//! events observed on the same kernel thread, and owns the bounded tables
//! that make that possible (`thread_id -> RequestContext`,
//! `request_id -> RequestRollup`, and a branch journal).
//!
//! Single-owner state machine (design note §9): one `Correlator` instance is
//! mutated by pure `(event, &mut self) -> CorrelationOutcome` calls from the
//! pipeline; nothing here is `Sync` and nothing needs to be.

use std::collections::{HashMap, VecDeque};

use ioamp_common::{EventKind, Layer, LayerEvent};

use crate::config::RuntimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Live,
    Branched,
    Retiring,
    Retired,
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: u64,
    pub parent_request_id: u64,
    pub thread_id: u64,
    pub origin_timestamp: u64,
    pub origin_size_bytes: u64,
    pub op_kind: EventKind,
    pub branch_count: u32,
    pub object_name: Option<String>,
    pub state: ContextState,
    pub last_touch: u64,
    pub retiring_since: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Branch {
    pub parent_request_id: u64,
    pub branch_id: u32,
    pub branch_timestamp: u64,
}

#[derive(Debug, Clone)]
pub struct RequestRollup {
    pub request_id: u64,
    pub op_kind: EventKind,
    pub object_name: Option<String>,
    pub per_layer_bytes: [u64; 5],
    pub per_layer_aligned_bytes: [u64; 5],
    pub vfs_reads: u64,
    pub vfs_writes: u64,
    pub bio_submits: u64,
    pub journal_ops: u64,
    pub metadata_ops: u64,
    pub erasure_branches: u32,
    pub replication_factor: u32,
    pub branch_count: u32,
    pub start_ts: u64,
    pub end_ts: u64,
}

impl RequestRollup {
    fn new(ctx: &RequestContext) -> Self {
        Self {
            request_id: ctx.request_id,
            op_kind: ctx.op_kind,
            object_name: ctx.object_name.clone(),
            per_layer_bytes: [0; 5],
            per_layer_aligned_bytes: [0; 5],
            vfs_reads: 0,
            vfs_writes: 0,
            bio_submits: 0,
            journal_ops: 0,
            metadata_ops: 0,
            erasure_branches: 0,
            replication_factor: 0,
            branch_count: ctx.branch_count,
            start_ts: ctx.origin_timestamp,
            end_ts: ctx.origin_timestamp,
        }
    }

    pub fn is_workload(&self) -> bool {
        matches!(
            self.op_kind,
            EventKind::AppObjectGet | EventKind::AppObjectPut
        )
    }
}

/// Outcome of correlating one event: whether it got a request identity and,
/// if so, whether it also landed in that request's rollup.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationOutcome {
    pub request_id: u64,
    pub parent_request_id: u64,
    pub branch_id: u32,
    pub branch_count: u32,
    /// The event has a `request_id` but arrived after the request's grace
    /// window closed — counted in `LayerStats` but not folded into the
    /// rollup.
    pub straggler: bool,
    pub ancestor_is_workload: bool,
}

impl CorrelationOutcome {
    fn unattributed() -> Self {
        Self {
            request_id: 0,
            parent_request_id: 0,
            branch_id: 0,
            branch_count: 0,
            straggler: false,
            ancestor_is_workload: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BioTimer {
    submitted_at: u64,
}

type BioKey = (u32, u32, u64, u64); // (device_major, device_minor, inode, offset_bytes)

pub struct Correlator {
    fan_out_window_ns: u64,
    idle_timeout_ns: u64,
    straggler_grace_ns: u64,
    max_active_contexts: usize,
    max_requests_tracked: usize,
    max_branch_journal: usize,

    active: HashMap<u64, RequestContext>,
    rollups: HashMap<u64, RequestRollup>,
    rollup_lru: VecDeque<u64>,
    branch_journal: VecDeque<Branch>,
    bio_timers: HashMap<BioKey, BioTimer>,

    pub unattributed_events: u64,
    pub late_events: u64,
    pub evicted_requests: u64,
    pub evicted_contexts: u64,
}

impl Correlator {
    pub fn new(cfg: &RuntimeConfig) -> Self {
        Self {
            fan_out_window_ns: cfg.fan_out_window_ms * 1_000_000,
            idle_timeout_ns: cfg.idle_timeout_ms * 1_000_000,
            straggler_grace_ns: cfg.straggler_grace_ms * 1_000_000,
            max_active_contexts: cfg.max_active_contexts,
            max_requests_tracked: cfg.max_requests_tracked,
            max_branch_journal: cfg.max_branch_journal,
            active: HashMap::new(),
            rollups: HashMap::new(),
            rollup_lru: VecDeque::new(),
            branch_journal: VecDeque::new(),
            bio_timers: HashMap::new(),
            unattributed_events: 0,
            late_events: 0,
            evicted_requests: 0,
            evicted_contexts: 0,
        }
    }

    pub fn active_context_count(&self) -> usize {
        self.active.len()
    }

    pub fn tracked_request_count(&self) -> usize {
        self.rollups.len()
    }

    pub fn branch_journal_len(&self) -> usize {
        self.branch_journal.len()
    }

    pub fn rollups(&self) -> impl Iterator<Item = &RequestRollup> {
        self.rollups.values()
    }

    pub fn rollup_mut(&mut self, request_id: u64) -> Option<&mut RequestRollup> {
        self.rollups.get_mut(&request_id)
    }

    /// Request-id assignment: `(thread_id << 32) | (timestamp_ns & 0xFFFFFFFF)`,
    /// unique per thread within ~4 seconds and the canonical key everywhere
    /// downstream (design note §9: kept unchanged from the source scheme).
    fn generate_request_id(thread_id: u64, timestamp: u64) -> u64 {
        (thread_id << 32) | (timestamp & 0xFFFF_FFFF)
    }

    /// Main entry point: observe one event, updating context/rollup state,
    /// and report how (if at all) it was attributed to a request.
    pub fn process(&mut self, event: &LayerEvent) -> CorrelationOutcome {
        self.retire_idle_contexts(event.timestamp);

        if event.layer == Layer::Application {
            return self.process_application_event(event);
        }

        self.process_deeper_layer_event(event)
    }

    fn process_application_event(&mut self, event: &LayerEvent) -> CorrelationOutcome {
        let thread_id = event.thread_id;

        let within_window = self
            .active
            .get(&thread_id)
            .map(|ctx| {
                ctx.state != ContextState::Retired
                    && event.timestamp.saturating_sub(ctx.origin_timestamp) <= self.fan_out_window_ns
            })
            .unwrap_or(false);

        if within_window {
            let branch_id;
            let request_id;
            let parent_request_id;
            let branch_count;
            let is_workload;
            {
                let ctx = self.active.get_mut(&thread_id).unwrap();
                ctx.branch_count += 1;
                ctx.state = ContextState::Branched;
                ctx.last_touch = event.timestamp;
                branch_id = ctx.branch_count - 1;
                request_id = ctx.request_id;
                parent_request_id = ctx.request_id;
                branch_count = ctx.branch_count;
            }
            self.push_branch(Branch {
                parent_request_id,
                branch_id,
                branch_timestamp: event.timestamp,
            });
            is_workload = self
                .rollups
                .get(&request_id)
                .map(|r| r.is_workload())
                .unwrap_or(false);
            if let Some(r) = self.rollups.get_mut(&request_id) {
                r.branch_count = branch_count;
            }
            self.touch_rollup(request_id);

            return CorrelationOutcome {
                request_id,
                parent_request_id,
                branch_id,
                branch_count,
                straggler: false,
                ancestor_is_workload: is_workload,
            };
        }

        // Either no context yet, or the previous one aged out of the
        // fan-out window: retire it implicitly and start a new one.
        if let Some(prev) = self.active.remove(&thread_id) {
            self.retire_context(prev, event.timestamp);
        }

        let request_id = Self::generate_request_id(thread_id, event.timestamp);
        let op_kind = event.event_kind;
        let ctx = RequestContext {
            request_id,
            parent_request_id: 0,
            thread_id,
            origin_timestamp: event.timestamp,
            origin_size_bytes: event.size_bytes,
            op_kind,
            branch_count: 1,
            object_name: (!event.filename.is_empty()).then(|| event.filename.clone()),
            state: ContextState::Live,
            last_touch: event.timestamp,
            retiring_since: None,
        };
        self.evict_contexts_if_needed();
        let is_workload = matches!(op_kind, EventKind::AppObjectGet | EventKind::AppObjectPut);
        self.insert_rollup(&ctx);
        self.active.insert(thread_id, ctx);

        CorrelationOutcome {
            request_id,
            parent_request_id: 0,
            branch_id: 0,
            branch_count: 1,
            straggler: false,
            ancestor_is_workload: is_workload,
        }
    }

    fn process_deeper_layer_event(&mut self, event: &LayerEvent) -> CorrelationOutcome {
        if event.event_kind == EventKind::DevBioSubmit {
            let key = bio_key(event);
            self.bio_timers.insert(
                key,
                BioTimer {
                    submitted_at: event.timestamp,
                },
            );
        }

        let thread_id = event.thread_id;
        let Some(ctx) = self.active.get_mut(&thread_id) else {
            self.unattributed_events += 1;
            return CorrelationOutcome::unattributed();
        };

        ctx.last_touch = event.timestamp;
        let request_id = ctx.request_id;
        let parent_request_id = ctx.parent_request_id;
        let branch_id = ctx.branch_count.saturating_sub(1);
        let branch_count = ctx.branch_count;

        if ctx.state == ContextState::Retiring {
            let since = ctx.retiring_since.unwrap_or(event.timestamp);
            if event.timestamp.saturating_sub(since) > self.straggler_grace_ns {
                self.late_events += 1;
                return CorrelationOutcome {
                    request_id,
                    parent_request_id,
                    branch_id,
                    branch_count,
                    straggler: true,
                    ancestor_is_workload: false,
                };
            }
        }

        let is_workload = self
            .rollups
            .get(&request_id)
            .map(|r| r.is_workload())
            .unwrap_or(false);
        self.touch_rollup(request_id);

        CorrelationOutcome {
            request_id,
            parent_request_id,
            branch_id,
            branch_count,
            straggler: false,
            ancestor_is_workload: is_workload,
        }
    }

    /// Device completions: `BioComplete` closes out the timer a matching
    /// `BioSubmit` opened, returning the elapsed nanoseconds for latency
    /// refinement. A completion with no matching submit is accepted (may
    /// precede tracer start) and yields `None`.
    pub fn resolve_bio_completion(&mut self, event: &LayerEvent) -> Option<u64> {
        let key = bio_key(event);
        self.bio_timers
            .remove(&key)
            .map(|timer| event.timestamp.saturating_sub(timer.submitted_at))
    }

    /// Transition an application-layer exit event's context straight to
    /// `Retiring`, opening the straggler grace window.
    pub fn mark_exit(&mut self, thread_id: u64, now: u64) {
        if let Some(ctx) = self.active.get_mut(&thread_id) {
            ctx.state = ContextState::Retiring;
            ctx.retiring_since = Some(now);
        }
    }

    /// Contexts that have seen no event (of any layer) for longer than
    /// `idle_timeout_ns` are abandoned and force-retired. This is
    /// independent of the straggler grace window: a `Retiring` context
    /// whose grace period has elapsed is not proactively evicted here —
    /// `process_deeper_layer_event` already flags late arrivals reactively
    /// per event, and a thread can keep renewing the grace window with
    /// further Application-layer branches well past `straggler_grace_ns`
    /// but still within `idle_timeout_ns`.
    fn retire_idle_contexts(&mut self, now: u64) {
        let idle_timeout_ns = self.idle_timeout_ns;
        let stale: Vec<u64> = self
            .active
            .iter()
            .filter(|(_, ctx)| now.saturating_sub(ctx.last_touch) > idle_timeout_ns)
            .map(|(tid, _)| *tid)
            .collect();
        for tid in stale {
            if let Some(ctx) = self.active.remove(&tid) {
                self.retire_context(ctx, now);
            }
        }
    }

    fn retire_context(&mut self, mut ctx: RequestContext, now: u64) {
        if ctx.state != ContextState::Retiring {
            ctx.state = ContextState::Retiring;
            ctx.retiring_since = Some(now);
        }
        ctx.state = ContextState::Retired;
    }

    /// Force-retire every live context — called on shutdown so the
    /// termination report reflects residual in-flight requests.
    pub fn drain_on_shutdown(&mut self, now: u64) {
        let tids: Vec<u64> = self.active.keys().copied().collect();
        for tid in tids {
            if let Some(ctx) = self.active.remove(&tid) {
                self.retire_context(ctx, now);
            }
        }
    }

    fn insert_rollup(&mut self, ctx: &RequestContext) {
        if self.rollups.len() >= self.max_requests_tracked {
            self.evict_oldest_rollup();
        }
        self.rollups
            .insert(ctx.request_id, RequestRollup::new(ctx));
        self.rollup_lru.push_back(ctx.request_id);
    }

    fn touch_rollup(&mut self, request_id: u64) {
        if let Some(pos) = self.rollup_lru.iter().position(|&id| id == request_id) {
            let id = self.rollup_lru.remove(pos).unwrap();
            self.rollup_lru.push_back(id);
        }
    }

    fn evict_oldest_rollup(&mut self) {
        if let Some(oldest) = self.rollup_lru.pop_front() {
            self.rollups.remove(&oldest);
            self.evicted_requests += 1;
        }
    }

    fn evict_contexts_if_needed(&mut self) {
        if self.active.len() < self.max_active_contexts {
            return;
        }
        if let Some((&tid, _)) = self
            .active
            .iter()
            .min_by_key(|(_, ctx)| ctx.last_touch)
        {
            self.active.remove(&tid);
            self.evicted_contexts += 1;
        }
    }

    fn push_branch(&mut self, branch: Branch) {
        if self.branch_journal.len() >= self.max_branch_journal {
            self.branch_journal.pop_front();
        }
        self.branch_journal.push_back(branch);
    }
}

fn bio_key(event: &LayerEvent) -> BioKey {
    (
        event.device_major,
        event.device_minor,
        event.inode,
        event.offset_bytes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ioamp_common::{ClassificationFlags, SystemType};

    fn cfg() -> RuntimeConfig {
        RuntimeConfig {
            fan_out_window_ms: 50,
            idle_timeout_ms: 5_000,
            straggler_grace_ms: 10,
            max_active_contexts: 1024,
            max_requests_tracked: 1024,
            max_branch_journal: 1024,
        }
    }

    fn app_event(thread_id: u64, ts: u64, kind: EventKind, size: u64) -> LayerEvent {
        LayerEvent {
            timestamp: ts,
            process_id: 1,
            thread_id,
            layer: Layer::Application,
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
            aligned_size_bytes: 0,
            replication_count: 0,
            block_count: 0,
            flags: ClassificationFlags::default(),
        }
    }

    fn deeper_event(thread_id: u64, ts: u64, layer: Layer, kind: EventKind, size: u64) -> LayerEvent {
        let mut e = app_event(thread_id, ts, kind, size);
        e.layer = layer;
        e
    }

    #[test]
    fn first_app_event_creates_a_root_request() {
        let mut c = Correlator::new(&cfg());
        let e = app_event(7, 1_000, EventKind::AppWrite, 100);
        let outcome = c.process(&e);
        assert_ne!(outcome.request_id, 0);
        assert_eq!(outcome.parent_request_id, 0);
        assert_eq!(outcome.branch_count, 1);
        assert_eq!(c.tracked_request_count(), 1);
    }

    #[test]
    fn same_thread_within_window_branches_not_replaces() {
        let mut c = Correlator::new(&cfg());
        let root = c.process(&app_event(7, 1_000, EventKind::AppObjectPut, 1_048_576));
        let child1 = c.process(&app_event(7, 1_010, EventKind::AppWrite, 262_144));
        let child2 = c.process(&app_event(7, 1_020, EventKind::AppWrite, 262_144));

        assert_eq!(child1.request_id, root.request_id);
        assert_eq!(child2.request_id, root.request_id);
        assert_eq!(child1.branch_id, 0);
        assert_eq!(child2.branch_id, 1);
        assert_eq!(child2.branch_count, 3);
    }

    #[test]
    fn same_thread_outside_window_starts_a_new_request() {
        let mut c = Correlator::new(&cfg());
        let first = c.process(&app_event(7, 0, EventKind::AppWrite, 100));
        let second = c.process(&app_event(7, 60_000_000, EventKind::AppWrite, 100));
        assert_ne!(first.request_id, second.request_id);
    }

    #[test]
    fn deeper_layer_event_without_context_is_unattributed() {
        let mut c = Correlator::new(&cfg());
        let e = deeper_event(99, 0, Layer::OperatingSystem, EventKind::OsVfsWrite, 4096);
        let outcome = c.process(&e);
        assert_eq!(outcome.request_id, 0);
        assert_eq!(c.unattributed_events, 1);
    }

    #[test]
    fn deeper_layer_event_inherits_active_context() {
        let mut c = Correlator::new(&cfg());
        let root = c.process(&app_event(7, 0, EventKind::AppWrite, 100));
        let os = c.process(&deeper_event(7, 1, Layer::OperatingSystem, EventKind::OsVfsWrite, 4096));
        assert_eq!(os.request_id, root.request_id);
    }

    #[test]
    fn straggler_after_grace_window_is_counted_but_not_rolled_up() {
        let mut c = Correlator::new(&cfg());
        let _root = c.process(&app_event(7, 0, EventKind::AppWrite, 100));
        c.mark_exit(7, 0);
        let straggler = c.process(&deeper_event(
            7,
            20_000_000,
            Layer::OperatingSystem,
            EventKind::OsVfsWrite,
            4096,
        ));
        assert!(straggler.straggler);
        assert_eq!(c.late_events, 1);
    }

    #[test]
    fn bio_submit_then_complete_resolves_latency() {
        let mut c = Correlator::new(&cfg());
        let mut submit = deeper_event(7, 0, Layer::Device, EventKind::DevBioSubmit, 4096);
        submit.inode = 42;
        submit.device_major = 8;
        submit.device_minor = 1;
        c.process(&submit);

        let mut complete = submit.clone();
        complete.event_kind = EventKind::DevBioComplete;
        complete.timestamp = 120_000;
        let latency = c.resolve_bio_completion(&complete);
        assert_eq!(latency, Some(120_000));
    }

    #[test]
    fn bio_complete_without_submit_is_accepted_as_none() {
        let mut c = Correlator::new(&cfg());
        let complete = deeper_event(7, 0, Layer::Device, EventKind::DevBioComplete, 4096);
        assert_eq!(c.resolve_bio_completion(&complete), None);
    }

    #[test]
    fn branch_count_is_monotonically_non_decreasing() {
        let mut c = Correlator::new(&cfg());
        let mut last = 0;
        c.process(&app_event(7, 0, EventKind::AppObjectPut, 100));
        for i in 1..5u64 {
            let outcome = c.process(&app_event(7, i * 5, EventKind::AppWrite, 10));
            assert!(outcome.branch_count >= last);
            last = outcome.branch_count;
        }
    }
}
