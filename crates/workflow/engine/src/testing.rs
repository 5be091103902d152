//! Test doubles for exercising the engine
//!
//! - [`ScriptedExecutionLayer`]: stage work with configurable delays,
//!   faults and panics.
//! - [`FailingPersistence`]: wraps the in-memory backend and fails chosen
//!   writes.
//! - [`CallbackRecorder`]: callbacks that log what they saw.

use crate::error::{StageError, StageResult};
use crate::traits::{ExecutionLayer, StageInput};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workflow_persistence::*;
use workflow_types::{
    AgentProposal, ApprovalDecisionRecord, ApprovalHistoryFilter, ApprovalRequest,
    CancellationRecord, Run, RunId, WorkflowEvent, WorkflowHistoryEntry, WorkflowHistoryFilter,
};

use crate::events::WorkflowCallbacks;

/// Stage names as reported in faults and logs
pub const CAPABILITY_DISCOVERY: &str = "capability_discovery";
pub const AGENT_DECISION: &str = "agent_decision";
pub const RESULT_PROCESSING: &str = "result_processing";

// ── Scripted Execution Layer ─────────────────────────────────────────

#[derive(Clone, Debug)]
enum Fault {
    Fail(String),
    Panic(String),
    /// Fail this many times, then succeed
    Flaky(u32),
}

#[derive(Clone, Debug, Default)]
struct Script {
    delay: Duration,
    fault: Option<Fault>,
}

/// Execution layer driven by a per-stage script
#[derive(Debug, Default)]
pub struct ScriptedExecutionLayer {
    scripts: HashMap<&'static str, Script>,
    action: String,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl ScriptedExecutionLayer {
    pub fn new() -> Self {
        Self {
            action: "execute_task".to_string(),
            ..Default::default()
        }
    }

    /// Sleep before `stage` completes
    pub fn with_delay(mut self, stage: &'static str, delay: Duration) -> Self {
        self.scripts.entry(stage).or_default().delay = delay;
        self
    }

    /// Make `stage` fail with `reason`
    pub fn failing_at(mut self, stage: &'static str, reason: impl Into<String>) -> Self {
        self.scripts.entry(stage).or_default().fault = Some(Fault::Fail(reason.into()));
        self
    }

    /// Make `stage` panic with `message`
    pub fn panicking_at(mut self, stage: &'static str, message: impl Into<String>) -> Self {
        self.scripts.entry(stage).or_default().fault = Some(Fault::Panic(message.into()));
        self
    }

    /// Make `stage` fail `times` times before succeeding
    pub fn flaky_at(mut self, stage: &'static str, times: u32) -> Self {
        self.scripts.entry(stage).or_default().fault = Some(Fault::Flaky(times));
        self
    }

    /// Number of times `stage` was invoked
    pub fn calls(&self, stage: &str) -> u32 {
        self.calls
            .lock()
            .map(|c| c.get(stage).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    async fn play(&self, stage: &'static str) -> StageResult<()> {
        let attempt = match self.calls.lock() {
            Ok(mut calls) => {
                let n = calls.entry(stage).or_insert(0);
                *n += 1;
                *n
            }
            Err(_) => 1,
        };

        let Some(script) = self.scripts.get(stage) else {
            return Ok(());
        };
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        match &script.fault {
            None => Ok(()),
            Some(Fault::Fail(reason)) => Err(StageError::failed(stage, reason.clone())),
            Some(Fault::Panic(message)) => panic!("{message}"),
            Some(Fault::Flaky(times)) if attempt <= *times => {
                Err(StageError::failed(stage, format!("transient failure {attempt}")))
            }
            Some(Fault::Flaky(_)) => Ok(()),
        }
    }
}

#[async_trait]
impl ExecutionLayer for ScriptedExecutionLayer {
    async fn discover_capabilities(&self, _input: &StageInput) -> StageResult<Vec<String>> {
        self.play(CAPABILITY_DISCOVERY).await?;
        Ok(vec!["read".to_string(), "write".to_string()])
    }

    async fn decide(&self, _input: &StageInput) -> StageResult<AgentProposal> {
        self.play(AGENT_DECISION).await?;
        Ok(AgentProposal {
            action: self.action.clone(),
            steps: vec!["plan".to_string(), "act".to_string()],
        })
    }

    async fn process_result(&self, input: &StageInput) -> StageResult<Value> {
        self.play(RESULT_PROCESSING).await?;
        Ok(json!({
            "result": "scripted",
            "task": input.task_description,
            "decision": input.context.decision.as_ref().map(|d| d.decision.as_str()),
            "alternative_action": input.context.alternative_result,
        }))
    }
}

// ── Failing Persistence ──────────────────────────────────────────────

/// Which writes a [`FailingPersistence`] rejects
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailingWrites {
    pub events: bool,
    pub snapshots: bool,
    pub approvals: bool,
    pub cancellations: bool,
}

impl FailingWrites {
    pub fn none() -> Self {
        Self {
            events: false,
            snapshots: false,
            approvals: false,
            cancellations: false,
        }
    }

    pub fn all() -> Self {
        Self {
            events: true,
            snapshots: true,
            approvals: true,
            cancellations: true,
        }
    }

    pub fn events_only() -> Self {
        Self {
            events: true,
            snapshots: false,
            approvals: false,
            cancellations: false,
        }
    }
}

/// In-memory backend whose selected writes fail or stall
///
/// Reads always delegate, so a test can observe what did get stored.
#[derive(Debug, Clone)]
pub struct FailingPersistence {
    inner: InMemoryPersistence,
    failing: FailingWrites,
    decision_delay: Duration,
}

impl FailingPersistence {
    pub fn new(failing: FailingWrites) -> Self {
        Self {
            inner: InMemoryPersistence::new(),
            failing,
            decision_delay: Duration::ZERO,
        }
    }

    /// Hold every approval decision write for `delay` before storing it
    pub fn with_decision_delay(mut self, delay: Duration) -> Self {
        self.decision_delay = delay;
        self
    }

    pub fn inner(&self) -> &InMemoryPersistence {
        &self.inner
    }

    fn check(&self, enabled: bool, what: &str) -> PersistenceResult<()> {
        if enabled {
            Err(PersistenceError::Backend(format!("{what} store unavailable")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnapshotStorage for FailingPersistence {
    async fn save_run_snapshot(&self, run: &Run) -> PersistenceResult<()> {
        self.check(self.failing.snapshots, "snapshot")?;
        self.inner.save_run_snapshot(run).await
    }

    async fn load_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<Option<Run>> {
        self.inner.load_run_snapshot(run_id).await
    }

    async fn delete_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<bool> {
        self.inner.delete_run_snapshot(run_id).await
    }
}

#[async_trait]
impl EventStorage for FailingPersistence {
    async fn save_event(&self, event: &WorkflowEvent) -> PersistenceResult<()> {
        self.check(self.failing.events, "event")?;
        self.inner.save_event(event).await
    }

    async fn get_events(&self, run_id: &RunId) -> PersistenceResult<Vec<WorkflowEvent>> {
        self.inner.get_events(run_id).await
    }
}

#[async_trait]
impl ApprovalStorage for FailingPersistence {
    async fn save_approval_request(&self, request: &ApprovalRequest) -> PersistenceResult<()> {
        self.check(self.failing.approvals, "approval")?;
        self.inner.save_approval_request(request).await
    }

    async fn get_approval_request(
        &self,
        run_id: &RunId,
    ) -> PersistenceResult<Option<ApprovalRequest>> {
        self.inner.get_approval_request(run_id).await
    }

    async fn save_approval_decision(
        &self,
        record: &ApprovalDecisionRecord,
    ) -> PersistenceResult<()> {
        if !self.decision_delay.is_zero() {
            tokio::time::sleep(self.decision_delay).await;
        }
        self.check(self.failing.approvals, "approval")?;
        self.inner.save_approval_decision(record).await
    }

    async fn get_approval_history(
        &self,
        filter: &ApprovalHistoryFilter,
    ) -> PersistenceResult<Vec<ApprovalDecisionRecord>> {
        self.inner.get_approval_history(filter).await
    }
}

#[async_trait]
impl CancellationStorage for FailingPersistence {
    async fn save_cancellation(&self, record: &CancellationRecord) -> PersistenceResult<()> {
        self.check(self.failing.cancellations, "cancellation")?;
        self.inner.save_cancellation(record).await
    }

    async fn get_cancellation(
        &self,
        run_id: &RunId,
    ) -> PersistenceResult<Option<CancellationRecord>> {
        self.inner.get_cancellation(run_id).await
    }
}

#[async_trait]
impl HistoryStorage for FailingPersistence {
    async fn get_workflow_history(
        &self,
        filter: &WorkflowHistoryFilter,
    ) -> PersistenceResult<Vec<WorkflowHistoryEntry>> {
        self.inner.get_workflow_history(filter).await
    }
}

#[async_trait]
impl PersistenceManager for FailingPersistence {
    async fn clear(&self) -> PersistenceResult<()> {
        self.inner.clear().await
    }
}

// ── Callback Recorder ────────────────────────────────────────────────

/// Records every callback invocation as a short tag
#[derive(Clone, Debug, Default)]
pub struct CallbackRecorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallbackRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callbacks that write into this recorder
    ///
    /// Tags: `started`, `approval_required:<operation>`,
    /// `approved:<approver>`, `rejected:<approver>`, `timeout`,
    /// `completed`, `failed:<status>`. `on_event` is left unset.
    pub fn callbacks(&self) -> WorkflowCallbacks {
        let log = |entries: &Arc<Mutex<Vec<String>>>| {
            let entries = entries.clone();
            move |tag: String| {
                if let Ok(mut entries) = entries.lock() {
                    entries.push(tag);
                }
            }
        };

        let started = log(&self.entries);
        let required = log(&self.entries);
        let approved = log(&self.entries);
        let rejected = log(&self.entries);
        let timeout = log(&self.entries);
        let completed = log(&self.entries);
        let failed = log(&self.entries);

        WorkflowCallbacks::new()
            .on_workflow_started(move |_| started("started".to_string()))
            .on_approval_required(move |request| {
                required(format!("approval_required:{}", request.operation))
            })
            .on_approval_approved(move |_, who| approved(format!("approved:{who}")))
            .on_approval_rejected(move |_, who| rejected(format!("rejected:{who}")))
            .on_approval_timeout(move |_| timeout("timeout".to_string()))
            .on_workflow_completed(move |_| completed("completed".to_string()))
            .on_workflow_failed(move |result| failed(format!("failed:{}", result.status)))
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::RunContext;

    fn input() -> StageInput {
        StageInput {
            run_id: RunId::new("r"),
            task_description: "Process data".into(),
            agent_role: None,
            user_id: "system".into(),
            context: RunContext::default(),
        }
    }

    #[tokio::test]
    async fn test_flaky_stage_recovers() {
        let layer = ScriptedExecutionLayer::new().flaky_at(AGENT_DECISION, 1);
        assert!(layer.decide(&input()).await.is_err());
        assert!(layer.decide(&input()).await.is_ok());
        assert_eq!(layer.calls(AGENT_DECISION), 2);
    }

    #[tokio::test]
    async fn test_failing_persistence_rejects_selected_writes() {
        let store = FailingPersistence::new(FailingWrites::events_only());
        let ev = WorkflowEvent::new(workflow_types::WorkflowEventType::WorkflowStarted, RunId::new("r"));
        assert!(store.save_event(&ev).await.is_err());

        let run = Run::new(RunId::new("r"), "task", "system");
        store.save_run_snapshot(&run).await.unwrap();
        assert!(store.load_run_snapshot(&RunId::new("r")).await.unwrap().is_some());
    }
}
