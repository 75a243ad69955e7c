//! Correlation and amplification engine for I/O write-amplification tracing.
//!
//! This crate is the core described in the design: it ingests a stream of
//! [`ioamp_common::LayerEvent`]s from an [`source::EventSource`], threads a
//! request identity through layers ([`correlator`]), classifies and
//! aggregates them ([`classifier`]), and renders real-time records plus a
//! termination summary ([`sink`]). The kernel probe producer, process
//! discovery, and CLI argument parsing are adapters outside this crate;
//! [`demo`] stands in for the producer in tests and `--demo` runs.

pub mod classifier;
pub mod config;
pub mod correlator;
#[cfg(feature = "demo")]
pub mod demo;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod system_profile;

pub use error::{IoAmpError, Termination};
pub use pipeline::{Pipeline, PipelineOutcome};
