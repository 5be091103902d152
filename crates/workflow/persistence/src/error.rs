//! Persistence error types

use workflow_types::{ApprovalId, OrchestratorError};

/// Errors raised by persistence backends
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Approval decision already recorded: {0}")]
    DuplicateApproval(ApprovalId),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<PersistenceError> for OrchestratorError {
    fn from(err: PersistenceError) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}
