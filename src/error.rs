//! Crate-wide error type.
//!
//! Only configuration and external-table boundaries ever produce a
//! `PtaError`. Everything inside the worklist body (unsupported
//! instructions, out-of-bounds offsets, lookup misses) is handled in-band
//! with a Universal fallback or a "not yet" skip rather than surfacing as
//! an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtaError {
    #[error("invalid analysis configuration: {0}")]
    Config(String),

    #[error("external pointer table error: {0}")]
    ExternalTable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

pub type Result<T> = std::result::Result<T, PtaError>;
