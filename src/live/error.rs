//! Error types for supervisor actions on a live session.

use thiserror::Error;

use crate::backend::error::BackendError;

/// Live session error type.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The action requires a prior takeover.
    #[error("conversation is not taken over")]
    NotTakenOver,
    /// The supervisor message has no content.
    #[error("message is empty")]
    EmptyMessage,
    /// The session was already finalized.
    #[error("conversation already finalized")]
    Finalized,
    /// The backend rejected or failed the action.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Convenience result alias for live session actions.
pub type LiveResult<T> = Result<T, LiveError>;
