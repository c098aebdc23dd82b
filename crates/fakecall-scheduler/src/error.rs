use fakecall_core::CallId;
use fakecall_store::StoreError;
use thiserror::Error;

/// Errors surfaced by user-facing scheduling operations.
///
/// Timer-level races (stale fires, missing records) are never errors; they
/// show up as [`Dispatch::Discarded`](crate::dispatcher::Dispatch::Discarded).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The record store could not read or persist a call.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// No call with the given id exists.
    #[error("call not found: {id}")]
    CallNotFound { id: CallId },

    /// The presentation layer refused the launch request.
    #[error("presentation handoff failed for call {id}: {source}")]
    Handoff {
        id: CallId,
        #[source]
        source: HandoffError,
    },
}

impl SchedulerError {
    /// Whether the user-facing action may simply be tried again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SchedulerError::Store(_) | SchedulerError::Handoff { .. } => true,
            SchedulerError::CallNotFound { .. } => false,
        }
    }
}

/// Why a [`Presenter`](crate::handoff::Presenter) could not accept a launch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("launch queue is full")]
    QueueFull,

    #[error("presentation layer has shut down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
