use thiserror::Error;

use crate::session::{SessionId, SessionStatus};

/// Errors raised by session operations.
///
/// Input errors leave the session untouched. `Conflict` means a concurrent
/// request claimed the same transition first. `MergeFailed` is recorded on
/// the session (status `failed`) before being returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session is {actual}, expected {expected}")]
    InvalidStatus {
        expected: SessionStatus,
        actual: SessionStatus,
    },

    #[error("image limit reached ({limit} per session)")]
    CaptureLimitReached { limit: usize },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("session has no images to merge")]
    EmptySession,

    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("storage error: {0}")]
    Storage(String),
}
