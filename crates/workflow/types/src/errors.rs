//! Error taxonomy for orchestrator operations

use crate::{RunId, RunStatus};

/// Errors raised by orchestrator operations
///
/// Stage faults inside a run are never surfaced through this type; they end
/// the run as FAILED and are reported in its result.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(RunId),

    #[error("Workflow {run_id} is not awaiting approval (status: {status})")]
    NotAwaitingApproval { run_id: RunId, status: RunStatus },

    #[error("Workflow {run_id} already completed (status: {status})")]
    AlreadyCompleted { run_id: RunId, status: RunStatus },

    #[error("Invalid alternative action: {0}")]
    InvalidAlternativeAction(String),

    #[error("Approval timed out for workflow: {0}")]
    ApprovalTimeout(RunId),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_run() {
        let err = OrchestratorError::NotAwaitingApproval {
            run_id: RunId::new("run-42"),
            status: RunStatus::Success,
        };
        assert_eq!(
            err.to_string(),
            "Workflow run-42 is not awaiting approval (status: success)"
        );
        assert_eq!(
            OrchestratorError::WorkflowNotFound(RunId::new("x")).to_string(),
            "Workflow not found: x"
        );
    }
}
