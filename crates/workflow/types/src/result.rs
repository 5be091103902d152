//! The derived read view of a run

use crate::{ApprovalRequest, RunId, RunStatus, WorkflowEvent, WorkflowEventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of a run, derived from its current state and never stored on its own
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Always set for FAILED, TIMEOUT and CANCELLED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present while the run is awaiting approval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<ApprovalRequest>,
    pub events: Vec<WorkflowEvent>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

impl WorkflowResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Event types in emission order
    pub fn event_types(&self) -> Vec<WorkflowEventType> {
        self.events.iter().map(|e| e.event_type).collect()
    }

    /// Whether an event of the given type was emitted
    pub fn has_event(&self, event_type: WorkflowEventType) -> bool {
        self.events.iter().any(|e| e.event_type == event_type)
    }
}
