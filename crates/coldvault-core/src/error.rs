//! Error types module
//!
//! Typed errors shared across the workspace. Repositories and services use
//! `anyhow::Result` for propagation; these variants exist for failures that
//! callers match on (closed manager, integrity violations) rather than
//! merely report.

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Submitting work to a resource manager after `stop()`.
    #[error("resource manager is closed")]
    ManagerClosed,

    /// A restored artifact hashed to a different digest than recorded.
    /// The recovered bytes must not be stored.
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("configuration error: {0}")]
    Config(String),
}
