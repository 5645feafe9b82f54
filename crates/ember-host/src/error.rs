use std::path::PathBuf;

/// Errors surfaced by session construction and execution
///
/// Construction errors (`InvalidPath`, `NativeInitFailure`) are fatal to
/// session creation and are returned directly - nothing is retried
/// internally. `SessionClosed` and `SessionDegraded` mark the two terminal
/// lifecycle states; operations that hit them perform no native call.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("failed to initialize the native interpreter")]
    NativeInitFailure(#[source] anyhow::Error),

    #[error("session is closed")]
    SessionClosed,

    #[error("session degraded after an uninterruptible timeout")]
    SessionDegraded,
}
