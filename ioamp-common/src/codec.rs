use crate::wire::WireRecord;
use crate::MAX_FILENAME_LEN;

/// Total size of one wire record, little-endian, as laid out in the field
/// table: 392 bytes. Fields are *not* naturally aligned within this layout
/// (`size_bytes` lands on offset 28), so this is an explicit byte-by-byte
/// codec rather than a `#[repr(C)]` reinterpret cast.
pub const WIRE_RECORD_LEN: usize = 392;

const OFF_TIMESTAMP: usize = 0;
const OFF_PROCESS_ID: usize = 8;
const OFF_THREAD_ID: usize = 12;
const OFF_LAYER: usize = 16;
// 3 reserved bytes at 17..20
const OFF_EVENT_KIND: usize = 20;
const OFF_SYSTEM_TYPE: usize = 24;
const OFF_SIZE_BYTES: usize = 28;
const OFF_OFFSET_BYTES: usize = 36;
const OFF_LATENCY_NS: usize = 44;
const OFF_DEVICE_MAJOR: usize = 52;
const OFF_DEVICE_MINOR: usize = 56;
const OFF_RETVAL: usize = 60;
const OFF_INODE: usize = 64;
const OFF_REQUEST_ID: usize = 72;
const OFF_PARENT_REQUEST_ID: usize = 80;
const OFF_BRANCH_ID: usize = 88;
const OFF_BRANCH_COUNT: usize = 92;
const OFF_PROCESS_NAME: usize = 96;
const OFF_FILENAME: usize = 112;
const OFF_ALIGNED_SIZE_BYTES: usize = 368;
const OFF_REPLICATION_COUNT: usize = 376;
const OFF_BLOCK_COUNT: usize = 380;
const OFF_FLAGS: usize = 384;

/// A record arrived with the wrong length, or declared a layer/event tag
/// outside the known schema. Both are hard errors at the adapter boundary
/// (see `SchemaMismatch` in the error design) — the codec itself only
/// reports the length mismatch; tag validation happens one layer up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("record length {got} does not match expected {expected}")]
    WrongLength { expected: usize, got: usize },
}

pub fn encode(r: &WireRecord) -> [u8; WIRE_RECORD_LEN] {
    let mut buf = [0u8; WIRE_RECORD_LEN];

    buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].copy_from_slice(&r.timestamp.to_le_bytes());
    buf[OFF_PROCESS_ID..OFF_PROCESS_ID + 4].copy_from_slice(&r.process_id.to_le_bytes());
    buf[OFF_THREAD_ID..OFF_THREAD_ID + 4].copy_from_slice(&r.thread_id.to_le_bytes());
    buf[OFF_LAYER] = r.layer;
    buf[OFF_EVENT_KIND..OFF_EVENT_KIND + 4].copy_from_slice(&r.event_kind.to_le_bytes());
    buf[OFF_SYSTEM_TYPE..OFF_SYSTEM_TYPE + 4].copy_from_slice(&r.system_type.to_le_bytes());
    buf[OFF_SIZE_BYTES..OFF_SIZE_BYTES + 8].copy_from_slice(&r.size_bytes.to_le_bytes());
    buf[OFF_OFFSET_BYTES..OFF_OFFSET_BYTES + 8].copy_from_slice(&r.offset_bytes.to_le_bytes());
    buf[OFF_LATENCY_NS..OFF_LATENCY_NS + 8].copy_from_slice(&r.latency_ns.to_le_bytes());
    buf[OFF_DEVICE_MAJOR..OFF_DEVICE_MAJOR + 4].copy_from_slice(&r.device_major.to_le_bytes());
    buf[OFF_DEVICE_MINOR..OFF_DEVICE_MINOR + 4].copy_from_slice(&r.device_minor.to_le_bytes());
    buf[OFF_RETVAL..OFF_RETVAL + 4].copy_from_slice(&r.retval.to_le_bytes());
    buf[OFF_INODE..OFF_INODE + 8].copy_from_slice(&r.inode.to_le_bytes());
    buf[OFF_REQUEST_ID..OFF_REQUEST_ID + 8].copy_from_slice(&r.request_id.to_le_bytes());
    buf[OFF_PARENT_REQUEST_ID..OFF_PARENT_REQUEST_ID + 8]
        .copy_from_slice(&r.parent_request_id.to_le_bytes());
    buf[OFF_BRANCH_ID..OFF_BRANCH_ID + 4].copy_from_slice(&r.branch_id.to_le_bytes());
    buf[OFF_BRANCH_COUNT..OFF_BRANCH_COUNT + 4].copy_from_slice(&r.branch_count.to_le_bytes());
    buf[OFF_PROCESS_NAME..OFF_PROCESS_NAME + crate::MAX_COMM_LEN]
        .copy_from_slice(&r.process_name);
    buf[OFF_FILENAME..OFF_FILENAME + MAX_FILENAME_LEN].copy_from_slice(&r.filename);
    buf[OFF_ALIGNED_SIZE_BYTES..OFF_ALIGNED_SIZE_BYTES + 8]
        .copy_from_slice(&r.aligned_size_bytes.to_le_bytes());
    buf[OFF_REPLICATION_COUNT..OFF_REPLICATION_COUNT + 4]
        .copy_from_slice(&r.replication_count.to_le_bytes());
    buf[OFF_BLOCK_COUNT..OFF_BLOCK_COUNT + 4].copy_from_slice(&r.block_count.to_le_bytes());
    buf[OFF_FLAGS] = r.is_metadata;
    buf[OFF_FLAGS + 1] = r.is_journal;
    buf[OFF_FLAGS + 2] = r.cache_hit;
    buf[OFF_FLAGS + 3] = r.is_erasure;
    buf[OFF_FLAGS + 4] = r.erasure_data_blocks;
    buf[OFF_FLAGS + 5] = r.erasure_parity_blocks;
    buf[OFF_FLAGS + 6] = r.is_sidecar;
    buf[OFF_FLAGS + 7] = r.reserved_flag;

    buf
}

pub fn decode(buf: &[u8]) -> Result<WireRecord, DecodeError> {
    if buf.len() != WIRE_RECORD_LEN {
        return Err(DecodeError::WrongLength {
            expected: WIRE_RECORD_LEN,
            got: buf.len(),
        });
    }

    let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    let u64_at = |off: usize| u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
    let i32_at = |off: usize| i32::from_le_bytes(buf[off..off + 4].try_into().unwrap());

    let mut process_name = [0u8; crate::MAX_COMM_LEN];
    process_name.copy_from_slice(&buf[OFF_PROCESS_NAME..OFF_PROCESS_NAME + crate::MAX_COMM_LEN]);

    let mut filename = [0u8; MAX_FILENAME_LEN];
    filename.copy_from_slice(&buf[OFF_FILENAME..OFF_FILENAME + MAX_FILENAME_LEN]);

    Ok(WireRecord {
        timestamp: u64_at(OFF_TIMESTAMP),
        process_id: u32_at(OFF_PROCESS_ID),
        thread_id: u32_at(OFF_THREAD_ID),
        layer: buf[OFF_LAYER],
        event_kind: u32_at(OFF_EVENT_KIND),
        system_type: u32_at(OFF_SYSTEM_TYPE),
        size_bytes: u64_at(OFF_SIZE_BYTES),
        offset_bytes: u64_at(OFF_OFFSET_BYTES),
        latency_ns: u64_at(OFF_LATENCY_NS),
        device_major: u32_at(OFF_DEVICE_MAJOR),
        device_minor: u32_at(OFF_DEVICE_MINOR),
        retval: i32_at(OFF_RETVAL),
        inode: u64_at(OFF_INODE),
        request_id: u64_at(OFF_REQUEST_ID),
        parent_request_id: u64_at(OFF_PARENT_REQUEST_ID),
        branch_id: u32_at(OFF_BRANCH_ID),
        branch_count: u32_at(OFF_BRANCH_COUNT),
        process_name,
        filename,
        aligned_size_bytes: u64_at(OFF_ALIGNED_SIZE_BYTES),
        replication_count: u32_at(OFF_REPLICATION_COUNT),
        block_count: u32_at(OFF_BLOCK_COUNT),
        is_metadata: buf[OFF_FLAGS],
        is_journal: buf[OFF_FLAGS + 1],
        cache_hit: buf[OFF_FLAGS + 2],
        is_erasure: buf[OFF_FLAGS + 3],
        erasure_data_blocks: buf[OFF_FLAGS + 4],
        erasure_parity_blocks: buf[OFF_FLAGS + 5],
        is_sidecar: buf[OFF_FLAGS + 6],
        reserved_flag: buf[OFF_FLAGS + 7],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassificationFlags, EventKind, Layer, LayerEvent, SystemType};

    fn sample_event() -> LayerEvent {
        LayerEvent {
            timestamp: 123_456_789,
            process_id: 42,
            thread_id: 9,
            layer: Layer::Device,
            event_kind: EventKind::DevBioSubmit,
            system_type: SystemType::MinIo,
            size_bytes: 4096,
            offset_bytes: 8192,
            latency_ns: 120_000,
            device_major: 8,
            device_minor: 1,
            retval: 0,
            inode: 555,
            request_id: 0xdead_beef,
            parent_request_id: 0,
            branch_id: 0,
            branch_count: 1,
            process_name: "minio".to_string(),
            filename: "data/xl.meta".to_string(),
            aligned_size_bytes: 4096,
            replication_count: 0,
            block_count: 1,
            flags: ClassificationFlags {
                is_metadata: true,
                is_journal: false,
                cache_hit: false,
                is_erasure_shard: false,
                is_sidecar: true,
                erasure_data_blocks: 0,
                erasure_parity_blocks: 0,
            },
        }
    }

    #[test]
    fn record_length_is_392_bytes() {
        let wire = WireRecord::from(&sample_event());
        assert_eq!(encode(&wire).len(), WIRE_RECORD_LEN);
        assert_eq!(WIRE_RECORD_LEN, 392);
    }

    #[test]
    fn round_trips_through_bytes() {
        let event = sample_event();
        let wire = WireRecord::from(&event);
        let bytes = encode(&wire);
        let decoded_wire = decode(&bytes).unwrap();
        let decoded_event = LayerEvent::try_from(&decoded_wire).unwrap();
        assert_eq!(decoded_event, event);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = vec![0u8; WIRE_RECORD_LEN - 1];
        assert_eq!(
            decode(&bytes),
            Err(DecodeError::WrongLength {
                expected: WIRE_RECORD_LEN,
                got: WIRE_RECORD_LEN - 1
            })
        );
    }

    #[test]
    fn filename_null_terminator_is_respected() {
        let mut event = sample_event();
        event.filename = "short.bin".to_string();
        let wire = WireRecord::from(&event);
        let bytes = encode(&wire);
        let decoded = LayerEvent::try_from(&decode(&bytes).unwrap()).unwrap();
        assert_eq!(decoded.filename, "short.bin");
    }
}
