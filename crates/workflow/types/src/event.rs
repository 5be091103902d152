//! Workflow events: the append-only, per-run ordered log
//!
//! Every event carries a per-run `sequence` assigned by [`Run::push_event`](crate::Run::push_event),
//! so ordering does not depend on clock resolution.

use crate::{ApprovalRequest, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of events emitted while a run moves through the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventType {
    WorkflowStarted,
    CapabilityDiscoveryStarted,
    CapabilityDiscoveryCompleted,
    AgentDecisionStarted,
    AgentDecisionCompleted,
    PolicyValidationStarted,
    PolicyValidationCompleted,
    ApprovalRequired,
    ApprovalApproved,
    ApprovalRejected,
    ApprovalTimeout,
    AlternativeActionExecuted,
    ResultProcessingStarted,
    ResultProcessingCompleted,
    WorkflowCompleted,
    WorkflowFailed,
    WorkflowCancelled,
}

impl WorkflowEventType {
    /// Whether this event closes the run's event sequence
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEventType::WorkflowCompleted
                | WorkflowEventType::WorkflowFailed
                | WorkflowEventType::WorkflowCancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEventType::WorkflowStarted => "workflow_started",
            WorkflowEventType::CapabilityDiscoveryStarted => "capability_discovery_started",
            WorkflowEventType::CapabilityDiscoveryCompleted => "capability_discovery_completed",
            WorkflowEventType::AgentDecisionStarted => "agent_decision_started",
            WorkflowEventType::AgentDecisionCompleted => "agent_decision_completed",
            WorkflowEventType::PolicyValidationStarted => "policy_validation_started",
            WorkflowEventType::PolicyValidationCompleted => "policy_validation_completed",
            WorkflowEventType::ApprovalRequired => "approval_required",
            WorkflowEventType::ApprovalApproved => "approval_approved",
            WorkflowEventType::ApprovalRejected => "approval_rejected",
            WorkflowEventType::ApprovalTimeout => "approval_timeout",
            WorkflowEventType::AlternativeActionExecuted => "alternative_action_executed",
            WorkflowEventType::ResultProcessingStarted => "result_processing_started",
            WorkflowEventType::ResultProcessingCompleted => "result_processing_completed",
            WorkflowEventType::WorkflowCompleted => "workflow_completed",
            WorkflowEventType::WorkflowFailed => "workflow_failed",
            WorkflowEventType::WorkflowCancelled => "workflow_cancelled",
        }
    }
}

impl std::fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a run's event log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,
    pub run_id: RunId,
    /// Position in the run's event sequence, starting at 0
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_request: Option<ApprovalRequest>,
}

impl WorkflowEvent {
    pub fn new(event_type: WorkflowEventType, run_id: RunId) -> Self {
        Self {
            event_type,
            run_id,
            sequence: 0,
            timestamp: Utc::now(),
            payload: Map::new(),
            approval_request: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_approval_request(mut self, request: ApprovalRequest) -> Self {
        self.approval_request = Some(request);
        self
    }

    /// Look up a payload field as a string
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_event_types() {
        assert!(WorkflowEventType::WorkflowCompleted.is_terminal());
        assert!(WorkflowEventType::WorkflowFailed.is_terminal());
        assert!(WorkflowEventType::WorkflowCancelled.is_terminal());
        assert!(!WorkflowEventType::ApprovalRequired.is_terminal());
    }

    #[test]
    fn event_type_serializes_as_snake_case() {
        let json = serde_json::to_value(WorkflowEventType::CapabilityDiscoveryStarted).unwrap();
        assert_eq!(json, "capability_discovery_started");
        assert_eq!(
            WorkflowEventType::ApprovalTimeout.to_string(),
            serde_json::to_value(WorkflowEventType::ApprovalTimeout).unwrap()
        );
    }

    #[test]
    fn payload_fields() {
        let event = WorkflowEvent::new(WorkflowEventType::WorkflowFailed, RunId::new("r1"))
            .with_field("reason", "Execution timeout")
            .with_field("attempts", 2);
        assert_eq!(event.field_str("reason"), Some("Execution timeout"));
        assert_eq!(event.payload["attempts"], 2);
        assert!(event.field_str("missing").is_none());
    }
}
