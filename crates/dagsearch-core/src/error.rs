//! Error kinds for the engine's fatal and degraded conditions.
//!
//! Per the trusted-performance-path policy: `ConfigurationError` and
//! `ResourceExhaustion` are fatal and bubble up as `Err`. A missing or
//! unloadable language model is not an error at all — it degrades silently
//! to `lmscore = 0` (see `Engine::with_language_model` vs `Engine::new`).
//! Invariant violations (a `create=true` step-score slot inside
//! `expand_beam`) are neither: they are a `debug_assert!` plus a trace log,
//! compiled out in release builds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("batch_size {requested} exceeds the configured maximum {max}")]
    BatchSizeExceeded { requested: usize, max: usize },

    #[error("arena pool exhausted: cursor would exceed pool_size {pool_size}")]
    ResourceExhaustion { pool_size: usize },

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
