//! Crate-wide error taxonomy (spec 7).
//!
//! Every component below owns an error enum scoped to its own failure
//! modes. [`OrchestratorError`] aggregates the cross-cutting taxonomy
//! and is the type callers working across components should hold.

use thiserror::Error;

/// Aggregated error taxonomy for the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed configuration, unknown timezone, missing required field.
    /// Surfaced to the caller; never retried.
    #[error("config error: {0}")]
    Config(String),

    /// Unknown task id, missing workspace, unknown routine id, missing
    /// content id.
    #[error("not found: {0}")]
    NotFound(String),

    /// A declared time bound was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// LLM, secret store, or channel adapter failure.
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    /// Cooperative cancellation; no side effects were committed past the
    /// cancellation point.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Sidekick fan-out limit, content-store size limit, or token budget
    /// exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Injection scan verdict was `block`.
    #[error("security violation: {0}")]
    SecurityViolation(String),

    /// Persistence-layer failure (SQLite, JSON file IO).
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Any other IO failure (atomic file writes, directory creation).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Message bus delivery failure crossing into orchestration code.
    #[error("bus error: {0}")]
    Bus(#[from] crate::bus::BusError),

    /// Sidekick fan-out failure crossing into orchestration code.
    #[error("sidekick error: {0}")]
    Sidekick(#[from] crate::sidekick::SidekickError),

    /// Routine scheduling failure crossing into orchestration code.
    #[error("routines error: {0}")]
    Routines(#[from] crate::routines::RoutinesError),
}

/// Convenience alias for fallible orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
