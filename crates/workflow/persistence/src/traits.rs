//! Persistence trait definitions

use crate::error::PersistenceError;
use async_trait::async_trait;
use workflow_types::{
    ApprovalDecisionRecord, ApprovalHistoryFilter, ApprovalRequest, CancellationRecord, Run,
    RunId, WorkflowEvent, WorkflowHistoryEntry, WorkflowHistoryFilter,
};

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Combined persistence interface consumed by the engine
#[async_trait]
pub trait PersistenceManager:
    SnapshotStorage + EventStorage + ApprovalStorage + CancellationStorage + HistoryStorage + Send + Sync
{
    /// Remove everything. Intended for tests.
    async fn clear(&self) -> PersistenceResult<()>;
}

/// Storage for run snapshots
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Create or replace the snapshot for `run.run_id`
    async fn save_run_snapshot(&self, run: &Run) -> PersistenceResult<()>;

    async fn load_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<Option<Run>>;

    /// Delete a snapshot. History entries are kept.
    async fn delete_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<bool>;
}

/// Storage for the per-run event log
#[async_trait]
pub trait EventStorage: Send + Sync {
    async fn save_event(&self, event: &WorkflowEvent) -> PersistenceResult<()>;

    /// Events for one run in the order they were saved
    async fn get_events(&self, run_id: &RunId) -> PersistenceResult<Vec<WorkflowEvent>>;
}

/// Storage for approval requests and decisions
#[async_trait]
pub trait ApprovalStorage: Send + Sync {
    async fn save_approval_request(&self, request: &ApprovalRequest) -> PersistenceResult<()>;

    /// Most recent request saved for the run
    async fn get_approval_request(&self, run_id: &RunId)
        -> PersistenceResult<Option<ApprovalRequest>>;

    /// Append a decision. Fails with `DuplicateApproval` if the
    /// `approval_id` was already recorded.
    async fn save_approval_decision(&self, record: &ApprovalDecisionRecord)
        -> PersistenceResult<()>;

    async fn get_approval_history(
        &self,
        filter: &ApprovalHistoryFilter,
    ) -> PersistenceResult<Vec<ApprovalDecisionRecord>>;
}

/// Storage for cancellation records
#[async_trait]
pub trait CancellationStorage: Send + Sync {
    async fn save_cancellation(&self, record: &CancellationRecord) -> PersistenceResult<()>;

    async fn get_cancellation(&self, run_id: &RunId)
        -> PersistenceResult<Option<CancellationRecord>>;
}

/// Storage for workflow history summaries
#[async_trait]
pub trait HistoryStorage: Send + Sync {
    async fn get_workflow_history(
        &self,
        filter: &WorkflowHistoryFilter,
    ) -> PersistenceResult<Vec<WorkflowHistoryEntry>>;
}
