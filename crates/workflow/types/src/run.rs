//! Runs: one execution attempt of a task through the pipeline
//!
//! A [`Run`] is exclusively owned by the engine while active. Once it
//! suspends or completes, a snapshot of the same type is handed to the
//! persistence layer. Status-specific data lives in [`RunState`], a tagged
//! union that serializes with a `status` discriminator.

use crate::{
    AlternativeActionResult, ApprovalDecisionRecord, ApprovalRequest, OrchestratorError,
    OrchestratorResult, RiskAssessment, RunStatus, WorkflowEvent, WorkflowEventType,
    WorkflowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Run Identifier ───────────────────────────────────────────────────

/// Unique identifier for a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Run State ────────────────────────────────────────────────────────

/// Status plus the data that only exists in that status
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    AwaitingApproval { request: ApprovalRequest },
    Success { output: Value },
    Failed { error: String },
    Timeout { error: String },
    Cancelled { error: String },
}

impl RunState {
    pub fn failed(error: impl Into<String>) -> Self {
        RunState::Failed {
            error: non_empty(error.into(), "Workflow failed"),
        }
    }

    pub fn timeout(error: impl Into<String>) -> Self {
        RunState::Timeout {
            error: non_empty(error.into(), "Execution timeout"),
        }
    }

    pub fn cancelled(error: impl Into<String>) -> Self {
        RunState::Cancelled {
            error: non_empty(error.into(), "Workflow cancelled"),
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunState::Pending => RunStatus::Pending,
            RunState::Running => RunStatus::Running,
            RunState::AwaitingApproval { .. } => RunStatus::AwaitingApproval,
            RunState::Success { .. } => RunStatus::Success,
            RunState::Failed { .. } => RunStatus::Failed,
            RunState::Timeout { .. } => RunStatus::Timeout,
            RunState::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    pub fn output(&self) -> Option<&Value> {
        match self {
            RunState::Success { output } => Some(output),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RunState::Failed { error } | RunState::Timeout { error } | RunState::Cancelled { error } => {
                Some(error)
            }
            _ => None,
        }
    }

    pub fn approval_request(&self) -> Option<&ApprovalRequest> {
        match self {
            RunState::AwaitingApproval { request } => Some(request),
            _ => None,
        }
    }
}

fn non_empty(s: String, fallback: &str) -> String {
    if s.trim().is_empty() {
        fallback.to_string()
    } else {
        s
    }
}

// ── Pipeline Context ─────────────────────────────────────────────────

/// What the agent proposed to do in the decision stage
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentProposal {
    pub action: String,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// Intermediate results carried between pipeline stages
///
/// Persisted with the snapshot so a suspended run can resume from its
/// approval gate.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<AgentProposal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    /// Authoritative decision of the most recent approval gate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecisionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_result: Option<AlternativeActionResult>,
}

// ── Run ──────────────────────────────────────────────────────────────

/// A run and its ordered event log
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    pub user_id: String,
    pub state: RunState,
    #[serde(default)]
    pub context: RunContext,
    #[serde(default)]
    pub events: Vec<WorkflowEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Create a pending run
    pub fn new(
        run_id: RunId,
        task_description: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            task_description: task_description.into(),
            agent_role: None,
            user_id: user_id.into(),
            state: RunState::Pending,
            context: RunContext::default(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_agent_role(mut self, role: Option<String>) -> Self {
        self.agent_role = role;
        self
    }

    pub fn status(&self) -> RunStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move to `next`, rejecting any edge outside the status machine.
    pub fn transition(&mut self, next: RunState) -> OrchestratorResult<()> {
        let from = self.status();
        let to = next.status();
        if !from.can_transition_to(to) {
            return Err(OrchestratorError::InvalidTransition { from, to });
        }

        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Append an event, assigning its sequence number and clamping its
    /// timestamp so the log never moves backward in time.
    pub fn push_event(&mut self, mut event: WorkflowEvent) -> &WorkflowEvent {
        event.run_id = self.run_id.clone();
        event.sequence = self.events.len() as u64;
        if let Some(last) = self.events.last() {
            if event.timestamp < last.timestamp {
                event.timestamp = last.timestamp;
            }
        }
        self.updated_at = event.timestamp.max(self.updated_at);
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Append a bare event of the given type
    pub fn record(&mut self, event_type: WorkflowEventType) -> &WorkflowEvent {
        let event = WorkflowEvent::new(event_type, self.run_id.clone());
        self.push_event(event)
    }

    /// Seconds between creation and completion
    pub fn duration_secs(&self) -> Option<f64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds() as f64 / 1000.0)
    }

    /// Derive the read-only result view
    pub fn to_result(&self) -> WorkflowResult {
        WorkflowResult {
            run_id: self.run_id.clone(),
            status: self.status(),
            output: self.state.output().cloned(),
            error: self.state.error().map(str::to_string),
            approval_request: self.state.approval_request().cloned(),
            events: self.events.clone(),
            started_at: self.created_at,
            completed_at: self.completed_at,
            duration_secs: self.duration_secs(),
        }
    }
}
