//! Error types for the rotation engine and its collaborators.
//!
//! - [`StoreError`]: a collaborator (library, queue, config store, request
//!   log) failed to read or write.
//! - [`EngineError`]: an engine operation could not produce a result.
//!
//! A rejected listener request is not an error; admission reports it through
//! [`crate::scheduler::request_policy::AdmissionDecision::Rejected`].

use thiserror::Error;

/// Failure reported by one of the external stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The store is reachable in principle but refused the call
    /// (disconnected pool, injected failure, ...).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures surfaced by [`crate::scheduler::autodj::RotationEngine`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EngineError {
    /// No slot matches the current day/hour and no default slot is configured.
    #[error("no clockwheel slot is active right now")]
    NoSlotAvailable,

    /// Every relaxation tier was tried and nothing qualified.
    #[error("no eligible track (last slot tried: {slot_id:?})")]
    NoEligibleTrack { slot_id: Option<String> },

    /// Reading from the metadata store, config store or request log failed.
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(#[source] StoreError),

    /// The playback queue refused the insert.
    #[error("queue unavailable: {0}")]
    QueueUnavailable(#[source] StoreError),

    #[error("unknown clockwheel slot '{0}'")]
    UnknownSlot(String),

    #[error("request {0} not found")]
    RequestNotFound(i64),

    #[error("request {id} is {status} and cannot be {action}")]
    InvalidRequestState {
        id: i64,
        status: &'static str,
        action: &'static str,
    },
}

impl EngineError {
    /// Short stable label (snake_case) for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::NoSlotAvailable => "no_slot_available",
            EngineError::NoEligibleTrack { .. } => "no_eligible_track",
            EngineError::MetadataUnavailable(_) => "metadata_unavailable",
            EngineError::QueueUnavailable(_) => "queue_unavailable",
            EngineError::UnknownSlot(_) => "unknown_slot",
            EngineError::RequestNotFound(_) => "request_not_found",
            EngineError::InvalidRequestState { .. } => "invalid_request_state",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(EngineError::NoSlotAvailable.as_label(), "no_slot_available");
        assert_eq!(
            EngineError::NoEligibleTrack { slot_id: None }.as_label(),
            "no_eligible_track"
        );
        let err = EngineError::MetadataUnavailable(StoreError::Unavailable("down".into()));
        assert_eq!(err.as_label(), "metadata_unavailable");
        assert!(err.to_string().contains("down"));
    }
}
