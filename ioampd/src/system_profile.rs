//! Named classification profiles selected with `--system <name>`.
//!
//! A profile is just a starting [`ClassificationConfig`] tuned to the
//! filename conventions of a particular storage system; it is a
//! classification preset, not a source filter — the core does not
//! discover or launch processes (see the purpose & scope notes), so
//! `--system` only picks which filename heuristics apply to events that
//! already arrived.

use ioamp_common::SystemType;

use crate::config::ClassificationConfig;

/// Resolve a `--system` name into a starting classification config, or
/// `None` for an unrecognized name — the caller turns that into a
/// `ConfigurationError` (exit 1), never a silent ignore.
pub fn resolve(name: &str) -> Option<(SystemType, ClassificationConfig)> {
    let system = SystemType::from_name(name)?;
    Some((system, profile_for(system)))
}

/// The per-system filename conventions. `Unknown`/`Generic` fall back to
/// the engine defaults (MinIO-shaped: `xl.meta` sidecars, `/part.` shards).
pub fn profile_for(system: SystemType) -> ClassificationConfig {
    let mut cfg = ClassificationConfig::default();
    match system {
        SystemType::MinIo => {
            cfg.metadata_filename_suffixes = vec!["xl.meta".to_string()];
            cfg.erasure_shard_patterns = vec!["/part.".to_string()];
        }
        SystemType::Ceph => {
            cfg.metadata_filename_suffixes = vec!["__head".to_string(), ".bluefs".to_string()];
            cfg.erasure_shard_patterns = vec!["shard_".to_string()];
        }
        SystemType::Etcd => {
            cfg.metadata_filename_suffixes = vec![".snap".to_string(), "MANIFEST".to_string()];
            cfg.erasure_shard_patterns = vec![];
        }
        SystemType::Postgres => {
            cfg.metadata_filename_suffixes = vec!["pg_wal".to_string(), "pg_xact".to_string()];
            cfg.erasure_shard_patterns = vec![];
        }
        SystemType::GlusterFs => {
            cfg.metadata_filename_suffixes = vec![".glusterfs".to_string()];
            cfg.erasure_shard_patterns = vec![".shard_".to_string()];
        }
        SystemType::Generic | SystemType::Unknown => {}
    }
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_name_resolves() {
        let (system, cfg) = resolve("minio").unwrap();
        assert_eq!(system, SystemType::MinIo);
        assert!(cfg
            .metadata_filename_suffixes
            .iter()
            .any(|s| s == "xl.meta"));
    }

    #[test]
    fn unknown_name_is_none() {
        assert!(resolve("not-a-real-system").is_none());
    }

    #[test]
    fn ceph_profile_uses_ceph_conventions() {
        let (_, cfg) = resolve("ceph").unwrap();
        assert!(cfg
            .erasure_shard_patterns
            .iter()
            .any(|p| p == "shard_"));
    }
}
