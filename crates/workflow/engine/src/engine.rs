//! Workflow Engine: the public call surface
//!
//! The engine drives each run through its staged pipeline on a dedicated
//! task and exposes a blocking surface ([`start_run`], [`submit_approval`],
//! [`cancel_run`], status and history reads) plus a streaming one
//! ([`stream_run`]).
//!
//! Runs are tracked in an active-run registry keyed by `run_id`. Each entry
//! carries its own lock, so runs never contend with each other. Reads fall
//! back to the persistence layer once a run leaves the registry.
//!
//! [`start_run`]: WorkflowEngine::start_run
//! [`submit_approval`]: WorkflowEngine::submit_approval
//! [`cancel_run`]: WorkflowEngine::cancel_run
//! [`stream_run`]: WorkflowEngine::stream_run

use crate::builder::WorkflowEngineBuilder;
use crate::config::OrchestratorConfig;
use crate::coordinator::ApprovalCoordinator;
use crate::events::{EventSink, WorkflowCallbacks};
use crate::handle::RunHandle;
use crate::runner::StageRunner;
use crate::stream::RunStream;
use crate::traits::{AlternativeActionExecutor, ExecutionLayer, RiskClassifier};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use workflow_persistence::PersistenceManager;
use workflow_types::{
    AlternativeAction, ApprovalDecision, ApprovalDecisionRecord, ApprovalHistoryFilter,
    CancellationRecord, OrchestratorError, OrchestratorResult, Run, RunId, RunState, RunStatus,
    WorkflowEvent, WorkflowEventType, WorkflowHistoryEntry, WorkflowHistoryFilter, WorkflowResult,
};

/// User id recorded when the caller does not provide one
pub const DEFAULT_USER: &str = "system";

// ── Call Options ─────────────────────────────────────────────────────

/// Per-run options for `start_run` and `stream_run`
#[derive(Clone, Debug)]
pub struct RunOptions {
    pub agent_role: Option<String>,
    pub user_id: String,
    /// Overall deadline; the configured default when unset
    pub timeout: Option<Duration>,
    /// Approval wait; the configured default when unset
    pub approval_timeout: Option<Duration>,
    pub callbacks: Option<WorkflowCallbacks>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            agent_role: None,
            user_id: DEFAULT_USER.to_string(),
            timeout: None,
            approval_timeout: None,
            callbacks: None,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    pub fn with_callbacks(mut self, callbacks: WorkflowCallbacks) -> Self {
        self.callbacks = Some(callbacks);
        self
    }
}

/// A decision submitted by an approver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalSubmission {
    pub approved: bool,
    pub approver_id: String,
    pub reason: Option<String>,
    /// Substitute action; only read when `approved` is false
    pub alternative_action: Option<String>,
}

impl ApprovalSubmission {
    pub fn approve(approver_id: impl Into<String>) -> Self {
        Self {
            approved: true,
            approver_id: approver_id.into(),
            reason: None,
            alternative_action: None,
        }
    }

    pub fn reject(approver_id: impl Into<String>) -> Self {
        Self {
            approved: false,
            ..Self::approve(approver_id)
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_alternative_action(mut self, action: impl Into<String>) -> Self {
        self.alternative_action = Some(action.into());
        self
    }
}

// ── Engine ───────────────────────────────────────────────────────────

pub(crate) struct EngineInner {
    pub(crate) config: OrchestratorConfig,
    pub(crate) persistence: Arc<dyn PersistenceManager>,
    pub(crate) coordinator: ApprovalCoordinator,
    pub(crate) sink: EventSink,
    pub(crate) execution: Arc<dyn ExecutionLayer>,
    pub(crate) classifier: Arc<dyn RiskClassifier>,
    pub(crate) alternatives: Arc<dyn AlternativeActionExecutor>,
    pub(crate) runner: StageRunner,
    pub(crate) runs: DashMap<RunId, Arc<RunHandle>>,
    /// Serializes rebuilding runs from snapshots
    pub(crate) rehydration: tokio::sync::Mutex<()>,
}

/// The workflow engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("active_runs", &self.inner.runs.len())
            .field("coordinator", &self.inner.coordinator)
            .finish()
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl WorkflowEngine {
    /// Start building an engine
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::new()
    }

    /// Engine with reference collaborators and in-memory persistence
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::builder().with_config(config).build()
    }

    pub(crate) fn from_parts(
        config: OrchestratorConfig,
        persistence: Arc<dyn PersistenceManager>,
        execution: Arc<dyn ExecutionLayer>,
        classifier: Arc<dyn RiskClassifier>,
        alternatives: Arc<dyn AlternativeActionExecutor>,
    ) -> Self {
        let sink = EventSink::new(
            persistence.clone(),
            config.enable_event_logging,
            config.broadcast_capacity,
        );
        Self {
            inner: Arc::new(EngineInner {
                coordinator: ApprovalCoordinator::new(persistence.clone()),
                runner: StageRunner::from_config(&config.stage),
                config,
                persistence,
                sink,
                execution,
                classifier,
                alternatives,
                runs: DashMap::new(),
                rehydration: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn persistence(&self) -> Arc<dyn PersistenceManager> {
        self.inner.persistence.clone()
    }

    pub fn coordinator(&self) -> &ApprovalCoordinator {
        &self.inner.coordinator
    }

    /// Subscribe to events from every run
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.sink.subscribe()
    }

    /// Ids of runs currently held in the active registry
    pub fn active_runs(&self) -> Vec<RunId> {
        self.inner.runs.iter().map(|e| e.key().clone()).collect()
    }

    // ── Run Lifecycle ────────────────────────────────────────────────

    /// Run a task until it finishes or suspends at an approval gate.
    ///
    /// Never fails: stage faults, deadline expiry and cancellation are all
    /// reported through the returned result.
    pub async fn start_run(&self, task: impl Into<String>, options: RunOptions) -> WorkflowResult {
        let handle = self
            .launch(RunId::generate(), task.into(), options, None)
            .await;
        handle.checkpoint().await
    }

    /// Run a task and yield each event as it is produced.
    ///
    /// Nothing starts until the stream is first polled. The sequence ends
    /// after the run's terminal event. Dropping the stream does not stop the
    /// run.
    pub fn stream_run(&self, task: impl Into<String>, options: RunOptions) -> RunStream {
        let run_id = RunId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        RunStream::deferred(self.clone(), run_id, task.into(), options, tx, rx)
    }

    /// Submit a decision for a run suspended at an approval gate.
    ///
    /// Returns the authoritative record, which belongs to an earlier
    /// resolution if the gate was already decided. Waits until the resumed
    /// run reaches a terminal status.
    pub async fn submit_approval(
        &self,
        run_id: &RunId,
        submission: ApprovalSubmission,
    ) -> OrchestratorResult<ApprovalDecisionRecord> {
        let handle = self.handle_for_decision(run_id).await?;
        ensure_awaiting(run_id, handle.status())?;

        // parsed before the gate is touched so a malformed action leaves it open
        let alternative_action = match (submission.approved, &submission.alternative_action) {
            (false, Some(raw)) => {
                AlternativeAction::parse(raw)?;
                Some(raw.clone())
            }
            _ => None,
        };

        let decision = if submission.approved {
            ApprovalDecision::Approved
        } else {
            ApprovalDecision::Rejected
        };

        let record = self
            .inner
            .coordinator
            .resolve_open(
                run_id,
                decision,
                &submission.approver_id,
                submission.reason,
                alternative_action,
            )
            .await;

        let Some(record) = record else {
            // the gate closed between the status check and the decision
            return Err(match handle.status() {
                status if status.is_terminal() => OrchestratorError::AlreadyCompleted {
                    run_id: run_id.clone(),
                    status,
                },
                status => OrchestratorError::NotAwaitingApproval {
                    run_id: run_id.clone(),
                    status,
                },
            });
        };

        info!(
            run_id = %run_id,
            decision = %record.decision,
            approver = %record.approver_id,
            "Approval submitted"
        );

        handle.finished().await;
        Ok(record)
    }

    /// Cancel an active run on behalf of the system
    pub async fn cancel_run(&self, run_id: &RunId) -> OrchestratorResult<bool> {
        self.cancel_run_by(run_id, DEFAULT_USER, "Workflow cancelled")
            .await
    }

    /// Cancel an active run.
    ///
    /// Cancellation is cooperative: a stage already executing is not
    /// interrupted, and the pipeline stops at its next checkpoint.
    pub async fn cancel_run_by(
        &self,
        run_id: &RunId,
        cancelled_by: &str,
        reason: &str,
    ) -> OrchestratorResult<bool> {
        let handle = self.inner.runs.get(run_id).map(|h| h.clone());
        let Some(handle) = handle else {
            return self.cancel_persisted(run_id, cancelled_by, reason).await;
        };

        let mut run = handle.run.lock().await;
        let status = run.status();
        if status.is_terminal() {
            return Err(OrchestratorError::AlreadyCompleted {
                run_id: run_id.clone(),
                status,
            });
        }
        run.transition(RunState::cancelled(reason))?;

        let event = WorkflowEvent::new(WorkflowEventType::WorkflowCancelled, run_id.clone())
            .with_field("cancelled_by", cancelled_by)
            .with_field("reason", reason);
        self.record(&handle, &mut run, event).await;
        self.save_cancellation(&CancellationRecord::new(run_id.clone(), cancelled_by, reason))
            .await;

        info!(run_id = %run_id, cancelled_by, previous = %status, "Run cancelled");
        self.finalize(&handle, run).await;
        Ok(true)
    }

    async fn cancel_persisted(
        &self,
        run_id: &RunId,
        cancelled_by: &str,
        reason: &str,
    ) -> OrchestratorResult<bool> {
        let mut run = self.load(run_id).await?;
        let status = run.status();
        if status.is_terminal() {
            return Err(OrchestratorError::AlreadyCompleted {
                run_id: run_id.clone(),
                status,
            });
        }
        run.transition(RunState::cancelled(reason))?;

        let event = run
            .push_event(
                WorkflowEvent::new(WorkflowEventType::WorkflowCancelled, run_id.clone())
                    .with_field("cancelled_by", cancelled_by)
                    .with_field("reason", reason),
            )
            .clone();
        self.inner
            .sink
            .publish(&event, &WorkflowCallbacks::default())
            .await;
        self.save_cancellation(&CancellationRecord::new(run_id.clone(), cancelled_by, reason))
            .await;
        self.save_snapshot(&run).await;
        self.inner.coordinator.cleanup(run_id);

        info!(run_id = %run_id, cancelled_by, "Persisted run cancelled");
        Ok(true)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get_status(&self, run_id: &RunId) -> OrchestratorResult<RunStatus> {
        if let Some(status) = self.inner.runs.get(run_id).map(|h| h.status()) {
            return Ok(status);
        }
        Ok(self.load(run_id).await?.status())
    }

    /// The run's events in emission order
    pub async fn get_history(&self, run_id: &RunId) -> OrchestratorResult<Vec<WorkflowEvent>> {
        if let Some(handle) = self.active(run_id) {
            return Ok(handle.run.lock().await.events.clone());
        }
        if let Some(run) = self.inner.persistence.load_run_snapshot(run_id).await? {
            return Ok(run.events);
        }
        let logged = self.inner.persistence.get_events(run_id).await?;
        if logged.is_empty() {
            return Err(OrchestratorError::WorkflowNotFound(run_id.clone()));
        }
        Ok(logged)
    }

    /// Every decision recorded for the run, oldest first
    pub async fn get_approval_history(
        &self,
        run_id: &RunId,
    ) -> OrchestratorResult<Vec<ApprovalDecisionRecord>> {
        let records = self
            .inner
            .persistence
            .get_approval_history(&ApprovalHistoryFilter::for_run(run_id.clone()).page(0, usize::MAX))
            .await?;
        if records.is_empty() && !self.is_known(run_id).await? {
            return Err(OrchestratorError::WorkflowNotFound(run_id.clone()));
        }
        Ok(records)
    }

    /// Full view of a run, live or from its snapshot
    pub async fn get_run(&self, run_id: &RunId) -> OrchestratorResult<Run> {
        if let Some(handle) = self.active(run_id) {
            return Ok(handle.run.lock().await.clone());
        }
        self.load(run_id).await
    }

    pub async fn get_result(&self, run_id: &RunId) -> OrchestratorResult<WorkflowResult> {
        Ok(self.get_run(run_id).await?.to_result())
    }

    pub async fn query_approval_history(
        &self,
        filter: &ApprovalHistoryFilter,
    ) -> OrchestratorResult<Vec<ApprovalDecisionRecord>> {
        Ok(self.inner.persistence.get_approval_history(filter).await?)
    }

    pub async fn query_workflow_history(
        &self,
        filter: &WorkflowHistoryFilter,
    ) -> OrchestratorResult<Vec<WorkflowHistoryEntry>> {
        Ok(self.inner.persistence.get_workflow_history(filter).await?)
    }

    // ── Helpers ──────────────────────────────────────────────────────

    pub(crate) fn active(&self, run_id: &RunId) -> Option<Arc<RunHandle>> {
        self.inner.runs.get(run_id).map(|h| h.clone())
    }

    async fn load(&self, run_id: &RunId) -> OrchestratorResult<Run> {
        self.inner
            .persistence
            .load_run_snapshot(run_id)
            .await?
            .ok_or_else(|| OrchestratorError::WorkflowNotFound(run_id.clone()))
    }

    async fn is_known(&self, run_id: &RunId) -> OrchestratorResult<bool> {
        if self.inner.runs.contains_key(run_id) {
            return Ok(true);
        }
        Ok(self
            .inner
            .persistence
            .load_run_snapshot(run_id)
            .await?
            .is_some())
    }

    async fn handle_for_decision(&self, run_id: &RunId) -> OrchestratorResult<Arc<RunHandle>> {
        if let Some(handle) = self.active(run_id) {
            return Ok(handle);
        }
        let snapshot = self.load(run_id).await?;
        ensure_awaiting(run_id, snapshot.status())?;
        Ok(self.rehydrate(snapshot).await)
    }
}

fn ensure_awaiting(run_id: &RunId, status: RunStatus) -> OrchestratorResult<()> {
    match status {
        RunStatus::AwaitingApproval => Ok(()),
        status if status.is_terminal() => Err(OrchestratorError::AlreadyCompleted {
            run_id: run_id.clone(),
            status,
        }),
        status => Err(OrchestratorError::NotAwaitingApproval {
            run_id: run_id.clone(),
            status,
        }),
    }
}
