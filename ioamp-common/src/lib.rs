//! Wire protocol and shared data model for the I/O write-amplification tracer.
//!
//! This crate defines the record layout exchanged between an event producer
//! (a kernel probe, or the synthetic generator in `ioampd`) and the
//! correlation engine: the [`Layer`]/[`EventKind`] taxonomy, the in-memory
//! [`LayerEvent`], and the little-endian wire codec that moves it across a
//! ring buffer.

use core::fmt;

mod codec;
mod wire;

pub use codec::{decode, encode, DecodeError, WIRE_RECORD_LEN};
pub use wire::{RecordInterpretError, WireRecord};

/// One of the five fixed strata the tracer observes.
///
/// Numeric values match the canonical layer numbering used by the
/// original probe family (`1..=5`); `0` is reserved for "unknown / dropped".
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Layer {
    Application = 1,
    StorageService = 2,
    OperatingSystem = 3,
    Filesystem = 4,
    Device = 5,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Application,
        Layer::StorageService,
        Layer::OperatingSystem,
        Layer::Filesystem,
        Layer::Device,
    ];

    /// Index into a `[T; 5]` per-layer table.
    pub const fn index(self) -> usize {
        (self as u8 - 1) as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Layer::Application => "APPLICATION",
            Layer::StorageService => "STORAGE_SVC",
            Layer::OperatingSystem => "OS",
            Layer::Filesystem => "FILESYSTEM",
            Layer::Device => "DEVICE",
        }
    }

    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Layer::Application),
            2 => Some(Layer::StorageService),
            3 => Some(Layer::OperatingSystem),
            4 => Some(Layer::Filesystem),
            5 => Some(Layer::Device),
            _ => None,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A closed per-layer event kind, carried on the wire as a numeric
/// `system_type`-style code so producers in any language agree on the value.
///
/// The numbering (101-series Application, 201-series StorageService,
/// 301-series OS, 401-series Filesystem, 501-series Device) is kept
/// unchanged from the probe family this schema was distilled from.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EventKind {
    AppRead = 101,
    AppWrite = 102,
    AppObjectGet = 103,
    AppObjectPut = 104,

    SvcXlMeta = 201,
    SvcErasureWrite = 202,
    SvcMultipart = 203,
    SvcReplication = 204,

    OsVfsRead = 301,
    OsVfsWrite = 302,
    OsPageCacheHit = 303,
    OsPageCacheMiss = 304,

    FsJournalWrite = 401,
    FsMetadataUpdate = 402,
    FsInodeUpdate = 403,
    FsSync = 404,

    DevBioSubmit = 501,
    DevBioComplete = 502,
    DevDiscard = 503,
}

impl EventKind {
    pub const fn layer(self) -> Layer {
        match self {
            EventKind::AppRead
            | EventKind::AppWrite
            | EventKind::AppObjectGet
            | EventKind::AppObjectPut => Layer::Application,
            EventKind::SvcXlMeta
            | EventKind::SvcErasureWrite
            | EventKind::SvcMultipart
            | EventKind::SvcReplication => Layer::StorageService,
            EventKind::OsVfsRead
            | EventKind::OsVfsWrite
            | EventKind::OsPageCacheHit
            | EventKind::OsPageCacheMiss => Layer::OperatingSystem,
            EventKind::FsJournalWrite
            | EventKind::FsMetadataUpdate
            | EventKind::FsInodeUpdate
            | EventKind::FsSync => Layer::Filesystem,
            EventKind::DevBioSubmit | EventKind::DevBioComplete | EventKind::DevDiscard => {
                Layer::Device
            }
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            EventKind::AppRead => "APP_READ",
            EventKind::AppWrite => "APP_WRITE",
            EventKind::AppObjectGet => "APP_OBJECT_GET",
            EventKind::AppObjectPut => "APP_OBJECT_PUT",
            EventKind::SvcXlMeta => "SVC_XL_META",
            EventKind::SvcErasureWrite => "SVC_ERASURE_WRITE",
            EventKind::SvcMultipart => "SVC_MULTIPART",
            EventKind::SvcReplication => "SVC_REPLICATION",
            EventKind::OsVfsRead => "OS_VFS_READ",
            EventKind::OsVfsWrite => "OS_VFS_WRITE",
            EventKind::OsPageCacheHit => "OS_PAGE_CACHE_HIT",
            EventKind::OsPageCacheMiss => "OS_PAGE_CACHE_MISS",
            EventKind::FsJournalWrite => "FS_JOURNAL_WRITE",
            EventKind::FsMetadataUpdate => "FS_METADATA_UPDATE",
            EventKind::FsInodeUpdate => "FS_INODE_UPDATE",
            EventKind::FsSync => "FS_SYNC",
            EventKind::DevBioSubmit => "DEV_BIO_SUBMIT",
            EventKind::DevBioComplete => "DEV_BIO_COMPLETE",
            EventKind::DevDiscard => "DEV_DISCARD",
        }
    }

    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            101 => EventKind::AppRead,
            102 => EventKind::AppWrite,
            103 => EventKind::AppObjectGet,
            104 => EventKind::AppObjectPut,
            201 => EventKind::SvcXlMeta,
            202 => EventKind::SvcErasureWrite,
            203 => EventKind::SvcMultipart,
            204 => EventKind::SvcReplication,
            301 => EventKind::OsVfsRead,
            302 => EventKind::OsVfsWrite,
            303 => EventKind::OsPageCacheHit,
            304 => EventKind::OsPageCacheMiss,
            401 => EventKind::FsJournalWrite,
            402 => EventKind::FsMetadataUpdate,
            403 => EventKind::FsInodeUpdate,
            404 => EventKind::FsSync,
            501 => EventKind::DevBioSubmit,
            502 => EventKind::DevBioComplete,
            503 => EventKind::DevDiscard,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The storage system a trace was collected against; selects a
/// classification profile (`--system`, see `ioampd::config`).
#[repr(u32)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SystemType {
    #[default]
    Unknown = 0,
    MinIo = 1,
    Ceph = 2,
    Etcd = 3,
    Postgres = 4,
    GlusterFs = 5,
    Generic = 6,
}

impl SystemType {
    pub const fn name(self) -> &'static str {
        match self {
            SystemType::Unknown => "unknown",
            SystemType::MinIo => "minio",
            SystemType::Ceph => "ceph",
            SystemType::Etcd => "etcd",
            SystemType::Postgres => "postgres",
            SystemType::GlusterFs => "gluster",
            SystemType::Generic => "generic",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "minio" => SystemType::MinIo,
            "ceph" => SystemType::Ceph,
            "etcd" => SystemType::Etcd,
            "postgres" => SystemType::Postgres,
            "gluster" | "glusterfs" => SystemType::GlusterFs,
            "generic" => SystemType::Generic,
            _ => return None,
        })
    }

    pub const fn from_u32(v: u32) -> Self {
        match v {
            1 => SystemType::MinIo,
            2 => SystemType::Ceph,
            3 => SystemType::Etcd,
            4 => SystemType::Postgres,
            5 => SystemType::GlusterFs,
            6 => SystemType::Generic,
            _ => SystemType::Unknown,
        }
    }
}

/// Classification flags. The producer may pre-populate some of these
/// (`cache_hit` is cheap to observe at the probe site); the rest are filled
/// in by the classification engine and are advisory only — they never
/// change byte counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassificationFlags {
    pub is_metadata: bool,
    pub is_journal: bool,
    pub cache_hit: bool,
    pub is_erasure_shard: bool,
    pub is_sidecar: bool,
    pub erasure_data_blocks: u8,
    pub erasure_parity_blocks: u8,
}

/// A fixed-size, stack-allocated filename buffer mirroring the wire format's
/// 256-byte field. Not every event carries a filename; absence is an empty
/// string, not an error.
pub const MAX_FILENAME_LEN: usize = 256;
pub const MAX_COMM_LEN: usize = 16;

/// An immutable, decoded layer event — the unit the rest of the pipeline
/// operates on once the wire record has been validated and parsed.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LayerEvent {
    pub timestamp: u64,
    pub process_id: u32,
    pub thread_id: u64,
    pub layer: Layer,
    pub event_kind: EventKind,
    pub system_type: SystemType,
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
    pub process_name: String,
    pub filename: String,
    pub aligned_size_bytes: u64,
    pub replication_count: u32,
    pub block_count: u32,
    pub flags: ClassificationFlags,
}

impl LayerEvent {
    /// `aligned_bytes` per the invariant in the data model: falls back to
    /// `size_bytes` when the producer did not report an aligned size.
    pub fn effective_aligned_bytes(&self) -> u64 {
        if self.aligned_size_bytes != 0 {
            self.aligned_size_bytes
        } else {
            self.size_bytes
        }
    }
}
