use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::error::IoAmpError;

const DEFAULT_CONFIG_PATH: &str = "/etc/ioampd/ioampd.toml";
const ENV_CONFIG_PATH: &str = "IOAMP_CONFIG";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub straggler_policy: StragglerPolicyConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load configuration from file. The path can be overridden with the
    /// `IOAMP_CONFIG` environment variable. If the file is missing, defaults
    /// are returned; a malformed *default-path* file is also a soft failure
    /// (defaults win). An explicitly named `--config` path that fails to
    /// parse is the caller's responsibility to surface as a
    /// [`IoAmpError::Configuration`] (see [`Config::load_explicit`]).
    pub fn load() -> Self {
        let path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let path = PathBuf::from(path);
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    /// Load from an explicitly named path (`--config <path>`). A missing or
    /// unparsable file here is a hard configuration error, exit code 1.
    pub fn load_explicit(path: &std::path::Path) -> Result<Self, IoAmpError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| IoAmpError::Configuration(format!("{}: {e}", path.display())))?;
        toml::from_str(&contents)
            .map_err(|e| IoAmpError::Configuration(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_fan_out_window_ms")]
    pub fan_out_window_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_straggler_grace_ms")]
    pub straggler_grace_ms: u64,
    #[serde(default = "default_max_active_contexts")]
    pub max_active_contexts: usize,
    #[serde(default = "default_max_requests_tracked")]
    pub max_requests_tracked: usize,
    #[serde(default = "default_max_branch_journal")]
    pub max_branch_journal: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            fan_out_window_ms: default_fan_out_window_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            straggler_grace_ms: default_straggler_grace_ms(),
            max_active_contexts: default_max_active_contexts(),
            max_requests_tracked: default_max_requests_tracked(),
            max_branch_journal: default_max_branch_journal(),
        }
    }
}

fn default_fan_out_window_ms() -> u64 {
    50
}
fn default_idle_timeout_ms() -> u64 {
    5_000
}
fn default_straggler_grace_ms() -> u64 {
    10
}
fn default_max_active_contexts() -> usize {
    10_240
}
fn default_max_requests_tracked() -> usize {
    10_000
}
fn default_max_branch_journal() -> usize {
    40_960
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassificationConfig {
    #[serde(default = "default_journal_device_threshold_bytes")]
    pub journal_device_threshold_bytes: u64,
    #[serde(default = "default_metadata_filename_suffixes")]
    pub metadata_filename_suffixes: Vec<String>,
    #[serde(default = "default_erasure_shard_patterns")]
    pub erasure_shard_patterns: Vec<String>,
    #[serde(default = "default_account_metadata_in_device_bytes")]
    pub account_metadata_in_device_bytes: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            journal_device_threshold_bytes: default_journal_device_threshold_bytes(),
            metadata_filename_suffixes: default_metadata_filename_suffixes(),
            erasure_shard_patterns: default_erasure_shard_patterns(),
            account_metadata_in_device_bytes: default_account_metadata_in_device_bytes(),
        }
    }
}

fn default_journal_device_threshold_bytes() -> u64 {
    8_192
}
fn default_metadata_filename_suffixes() -> Vec<String> {
    vec!["xl.meta".to_string()]
}
fn default_erasure_shard_patterns() -> Vec<String> {
    vec!["/part.".to_string()]
}
fn default_account_metadata_in_device_bytes() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct StragglerPolicyConfig {
    #[serde(default = "default_count_unmatched_bio_submit")]
    pub count_unmatched_bio_submit_as_device_bytes: bool,
}

impl Default for StragglerPolicyConfig {
    fn default() -> Self {
        Self {
            count_unmatched_bio_submit_as_device_bytes: default_count_unmatched_bio_submit(),
        }
    }
}

fn default_count_unmatched_bio_submit() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Text,
    Json,
}

impl Default for ReportFormat {
    fn default() -> Self {
        ReportFormat::Text
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub workload_only: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            format: ReportFormat::default(),
            workload_only: false,
            verbose: false,
            realtime: default_realtime(),
        }
    }
}

fn default_top_n() -> usize {
    10
}
fn default_realtime() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputConfig {
    /// `None` means stdout.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"
[runtime]
fan_out_window_ms = 50
idle_timeout_ms = 5000
[report]
top_n = 10
format = "text"
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.runtime.fan_out_window_ms, 50);
        assert_eq!(cfg.runtime.straggler_grace_ms, 10);
        assert_eq!(cfg.runtime.max_requests_tracked, 10_000);
        assert!(cfg.classification.account_metadata_in_device_bytes);
        assert_eq!(cfg.report.top_n, 10);
        assert_eq!(cfg.report.format, ReportFormat::Text);
    }

    #[test]
    fn env_override_points_at_a_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\nfan_out_window_ms = 5").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
        }
        let cfg = Config::load();
        assert_eq!(cfg.runtime.fan_out_window_ms, 5);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn missing_default_path_falls_back_silently() {
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
        let cfg = Config::load();
        assert_eq!(cfg.runtime.max_branch_journal, 40_960);
    }

    #[test]
    fn explicit_malformed_path_is_a_hard_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not valid toml {{{{").unwrap();
        let err = Config::load_explicit(file.path()).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
