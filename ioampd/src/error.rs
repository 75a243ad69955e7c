//! Closed error enum for fatal conditions, mapped one-to-one to process exit
//! codes. Non-fatal conditions (producer drops, dangling branches,
//! stragglers, resource-bound evictions) are counters on the running state,
//! not errors — they never reach this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoAmpError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("producer unavailable: {0}")]
    ProducerUnavailable(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("sink write failure: {0}")]
    SinkWrite(#[from] std::io::Error),
}

impl IoAmpError {
    /// Exit code table from the error handling design: 1 configuration,
    /// 2 producer attach/schema failure, 3 output sink error.
    pub fn exit_code(&self) -> i32 {
        match self {
            IoAmpError::Configuration(_) => 1,
            IoAmpError::ProducerUnavailable(_) => 2,
            IoAmpError::SchemaMismatch(_) => 2,
            IoAmpError::SinkWrite(_) => 3,
        }
    }
}

/// Interrupted by signal or duration deadline — not an [`IoAmpError`]
/// because it is the graceful-exit path (exit 0 or 130), never a `fatal:`
/// line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Interrupted,
}

impl Termination {
    pub fn exit_code(self) -> i32 {
        match self {
            Termination::Completed => 0,
            Termination::Interrupted => 130,
        }
    }
}
