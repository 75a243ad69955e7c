use crate::{ClassificationFlags, EventKind, Layer, LayerEvent, SystemType};

/// The raw, producer-facing record shape: every field is a plain integer or
/// fixed-size byte array, matching the binary layout byte-for-byte. This is
/// the type the codec encodes/decodes; [`LayerEvent`] is the decoded,
/// application-facing view built from it.
#[derive(Clone, Debug, PartialEq)]
pub struct WireRecord {
    pub timestamp: u64,
    pub process_id: u32,
    pub thread_id: u32,
    pub layer: u8,
    pub event_kind: u32,
    pub system_type: u32,
    pub size_bytes: u64,
    pub offset_bytes: u64,
    pub latency_ns: u64,
    pub device_major: u32,
    pub device_minor: u32,
    pub retval: i32,
    pub inode: u64,
    pub request_id: u64,
    pub parent_request_id: u64,
    pub branch_id: u32,
    pub branch_count: u32,
    pub process_name: [u8; crate::MAX_COMM_LEN],
    pub filename: [u8; crate::MAX_FILENAME_LEN],
    pub aligned_size_bytes: u64,
    pub replication_count: u32,
    pub block_count: u32,
    pub is_metadata: u8,
    pub is_journal: u8,
    pub cache_hit: u8,
    pub is_erasure: u8,
    pub erasure_data_blocks: u8,
    pub erasure_parity_blocks: u8,
    pub is_sidecar: u8,
    pub reserved_flag: u8,
}

impl WireRecord {
    pub const fn zeroed() -> Self {
        Self {
            timestamp: 0,
            process_id: 0,
            thread_id: 0,
            layer: 0,
            event_kind: 0,
            system_type: 0,
            size_bytes: 0,
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
            process_name: [0; crate::MAX_COMM_LEN],
            filename: [0; crate::MAX_FILENAME_LEN],
            aligned_size_bytes: 0,
            replication_count: 0,
            block_count: 0,
            is_metadata: 0,
            is_journal: 0,
            cache_hit: 0,
            is_erasure: 0,
            erasure_data_blocks: 0,
            erasure_parity_blocks: 0,
            is_sidecar: 0,
            reserved_flag: 0,
        }
    }
}

fn cstr_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn string_to_buf<const N: usize>(s: &str) -> [u8; N] {
    let mut buf = [0u8; N];
    let bytes = s.as_bytes();
    let n = bytes.len().min(N.saturating_sub(1));
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

/// Errors produced while turning a decoded [`WireRecord`] into a
/// [`LayerEvent`] — distinct from [`crate::DecodeError`], which covers the
/// byte-level codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecordInterpretError {
    #[error("unknown layer tag {0}")]
    UnknownLayer(u8),
    #[error("unknown event kind {0}")]
    UnknownEventKind(u32),
}

impl TryFrom<&WireRecord> for LayerEvent {
    type Error = RecordInterpretError;

    fn try_from(r: &WireRecord) -> Result<Self, Self::Error> {
        let layer = Layer::from_u8(r.layer).ok_or(RecordInterpretError::UnknownLayer(r.layer))?;
        let event_kind = EventKind::from_u32(r.event_kind)
            .ok_or(RecordInterpretError::UnknownEventKind(r.event_kind))?;

        Ok(LayerEvent {
            timestamp: r.timestamp,
            process_id: r.process_id,
            thread_id: r.thread_id as u64,
            layer,
            event_kind,
            system_type: SystemType::from_u32(r.system_type),
            size_bytes: r.size_bytes,
            offset_bytes: r.offset_bytes,
            latency_ns: r.latency_ns,
            device_major: r.device_major,
            device_minor: r.device_minor,
            retval: r.retval,
            inode: r.inode,
            request_id: r.request_id,
            parent_request_id: r.parent_request_id,
            branch_id: r.branch_id,
            branch_count: r.branch_count,
            process_name: cstr_to_string(&r.process_name),
            filename: cstr_to_string(&r.filename),
            aligned_size_bytes: r.aligned_size_bytes,
            replication_count: r.replication_count,
            block_count: r.block_count,
            flags: ClassificationFlags {
                is_metadata: r.is_metadata != 0,
                is_journal: r.is_journal != 0,
                cache_hit: r.cache_hit != 0,
                is_erasure_shard: r.is_erasure != 0,
                is_sidecar: r.is_sidecar != 0,
                erasure_data_blocks: r.erasure_data_blocks,
                erasure_parity_blocks: r.erasure_parity_blocks,
            },
        })
    }
}

impl From<&LayerEvent> for WireRecord {
    fn from(e: &LayerEvent) -> Self {
        WireRecord {
            timestamp: e.timestamp,
            process_id: e.process_id,
            thread_id: e.thread_id as u32,
            layer: e.layer as u8,
            event_kind: e.event_kind as u32,
            system_type: e.system_type as u32,
            size_bytes: e.size_bytes,
            offset_bytes: e.offset_bytes,
            latency_ns: e.latency_ns,
            device_major: e.device_major,
            device_minor: e.device_minor,
            retval: e.retval,
            inode: e.inode,
            request_id: e.request_id,
            parent_request_id: e.parent_request_id,
            branch_id: e.branch_id,
            branch_count: e.branch_count,
            process_name: string_to_buf(&e.process_name),
            filename: string_to_buf(&e.filename),
            aligned_size_bytes: e.aligned_size_bytes,
            replication_count: e.replication_count,
            block_count: e.block_count,
            is_metadata: e.flags.is_metadata as u8,
            is_journal: e.flags.is_journal as u8,
            cache_hit: e.flags.cache_hit as u8,
            is_erasure: e.flags.is_erasure_shard as u8,
            erasure_data_blocks: e.flags.erasure_data_blocks,
            erasure_parity_blocks: e.flags.erasure_parity_blocks,
            is_sidecar: e.flags.is_sidecar as u8,
            reserved_flag: 0,
        }
    }
}
