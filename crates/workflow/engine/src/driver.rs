//! Pipeline driver
//!
//! Each run executes on its own spawned task:
//!
//! ```text
//! capability discovery → agent decision → policy validation
//!     → [approval gate] → result processing → completion
//! ```
//!
//! The whole pipeline sits under the run's overall deadline. Stage faults
//! and panics end the run as FAILED; deadline expiry ends it as TIMEOUT.
//! Every write goes through the run's own lock and first checks for a
//! terminal status, which is how cooperative cancellation takes effect.

use crate::engine::{RunOptions, WorkflowEngine};
use crate::error::{panic_message, StageError};
use crate::events::WorkflowCallbacks;
use crate::handle::RunHandle;
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use workflow_types::{
    AlternativeAction, ApprovalDecision, ApprovalDecisionRecord, ApprovalRequest, RiskAssessment,
    Run, RunId, RunState, RunStatus, WorkflowEvent, WorkflowEventType, SYSTEM_APPROVER,
};

/// Error recorded when the overall deadline elapses
pub const EXECUTION_TIMEOUT: &str = "Execution timeout";
/// Reason recorded on a gate closed by the overall deadline
pub const DEADLINE_REASON: &str = "Run deadline exceeded";
/// Error recorded when an approval gate times out
pub const APPROVAL_TIMEOUT_ERROR: &str = "Approval timeout";

/// Stand-in for "no deadline" when the configured timeout overflows
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Where the driver enters the pipeline
pub(crate) enum Phase {
    Start,
    /// Resume a run rebuilt from its snapshot at the approval gate
    AwaitDecision { wait: Duration },
}

/// Why the pipeline stopped early
enum Interrupt {
    Fault(StageError),
    /// The run already reached a terminal status elsewhere
    Halted,
}

impl From<StageError> for Interrupt {
    fn from(err: StageError) -> Self {
        Interrupt::Fault(err)
    }
}

type Step<T> = Result<T, Interrupt>;

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn event(event_type: WorkflowEventType, run_id: &RunId) -> WorkflowEvent {
    WorkflowEvent::new(event_type, run_id.clone())
}

fn decision_event(event_type: WorkflowEventType, record: &ApprovalDecisionRecord) -> WorkflowEvent {
    event(event_type, &record.run_id)
        .with_field("approver_id", record.approver_id.clone())
        .with_field("decision", record.decision.as_str())
        .with_field("reason", record.reason.clone())
        .with_field("alternative_action", record.alternative_action.clone())
}

impl WorkflowEngine {
    // ── Launch ───────────────────────────────────────────────────────

    /// Register a run, emit its start event and spawn its driver
    pub(crate) async fn launch(
        &self,
        run_id: RunId,
        task: String,
        options: RunOptions,
        stream: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    ) -> Arc<RunHandle> {
        let config = &self.inner.config;
        let timeout = options.timeout.unwrap_or_else(|| config.default_timeout());
        let approval_timeout = options
            .approval_timeout
            .unwrap_or_else(|| config.default_approval_timeout());

        let mut run =
            Run::new(run_id.clone(), task, options.user_id).with_agent_role(options.agent_role);
        if let Err(err) = run.transition(RunState::Running) {
            error!(run_id = %run_id, error = %err, "Failed to start run");
        }

        let handle = Arc::new(RunHandle::new(
            run,
            options.callbacks.unwrap_or_default(),
            deadline_after(timeout),
            approval_timeout,
            stream,
        ));
        self.inner.runs.insert(run_id.clone(), handle.clone());

        {
            let mut run = handle.run.lock().await;
            let started = event(WorkflowEventType::WorkflowStarted, &run_id)
                .with_field("task_description", run.task_description.clone())
                .with_field("agent_role", run.agent_role.clone());
            self.record(&handle, &mut run, started).await;
            self.save_snapshot(&run).await;
        }

        info!(
            run_id = %run_id,
            timeout = ?timeout,
            approval_timeout = ?approval_timeout,
            "Run started"
        );

        tokio::spawn(self.clone().drive(handle.clone(), Phase::Start));
        handle
    }

    /// Re-register a run known only from its snapshot and resume it at the
    /// approval gate with a fresh overall budget.
    pub(crate) async fn rehydrate(&self, run: Run) -> Arc<RunHandle> {
        let _guard = self.inner.rehydration.lock().await;
        if let Some(handle) = self.active(&run.run_id) {
            return handle;
        }

        let run_id = run.run_id.clone();
        let config = &self.inner.config;
        let request = run.state.approval_request().cloned();
        let approval_timeout = request
            .as_ref()
            .map(ApprovalRequest::timeout)
            .unwrap_or_else(|| config.default_approval_timeout());
        let wait = request
            .as_ref()
            .map(remaining_wait)
            .unwrap_or(approval_timeout);

        let handle = Arc::new(RunHandle::new(
            run,
            WorkflowCallbacks::default(),
            deadline_after(config.default_timeout()),
            approval_timeout,
            None,
        ));

        if let Some(request) = request {
            self.inner
                .coordinator
                .request_approval(&run_id, request, wait)
                .await;
        }
        self.inner.runs.insert(run_id.clone(), handle.clone());

        info!(
            run_id = %run_id,
            wait = ?wait,
            "Run rehydrated from snapshot"
        );

        tokio::spawn(self.clone().drive(handle.clone(), Phase::AwaitDecision { wait }));
        handle
    }

    // ── Driver ───────────────────────────────────────────────────────

    async fn drive(self, handle: Arc<RunHandle>, phase: Phase) {
        if Instant::now() >= handle.deadline {
            self.expire(&handle).await;
            return;
        }

        let pipeline = AssertUnwindSafe(self.pipeline(&handle, phase)).catch_unwind();

        // deadline polled first: an elapsed budget wins even if no stage yields
        let outcome = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(handle.deadline) => None,
            outcome = pipeline => Some(outcome),
        };

        match outcome {
            Some(Ok(Ok(()))) | Some(Ok(Err(Interrupt::Halted))) => {}
            Some(Ok(Err(Interrupt::Fault(err)))) => self.fail(&handle, &err).await,
            Some(Err(payload)) => {
                let err = StageError::Panicked {
                    stage: "pipeline",
                    message: panic_message(payload.as_ref()),
                };
                self.fail(&handle, &err).await
            }
            None => self.expire(&handle).await,
        }
    }

    async fn pipeline(&self, handle: &RunHandle, phase: Phase) -> Step<()> {
        let wait = match phase {
            Phase::Start => {
                self.discover(handle).await?;
                self.decide(handle).await?;
                let risk = self.validate(handle).await?;
                if risk.level >= self.inner.config.approval_threshold {
                    self.suspend(handle, &risk).await?;
                    Some(handle.approval_timeout)
                } else {
                    None
                }
            }
            Phase::AwaitDecision { wait } => Some(wait),
        };

        if let Some(wait) = wait {
            self.approval_gate(handle, wait).await?;
        }

        self.emit_with(handle, |run| {
            let level = run.context.risk.as_ref().map(|r| r.level.as_str());
            event(WorkflowEventType::PolicyValidationCompleted, &run.run_id)
                .with_field("risk_level", level)
        })
        .await?;

        self.process(handle).await
    }

    // ── Stages ───────────────────────────────────────────────────────

    async fn discover(&self, handle: &RunHandle) -> Step<()> {
        self.emit(handle, WorkflowEventType::CapabilityDiscoveryStarted)
            .await?;

        let input = handle.input().await;
        let execution = &self.inner.execution;
        let capabilities = self
            .inner
            .runner
            .run(&handle.run_id, "capability_discovery", || {
                execution.discover_capabilities(&input)
            })
            .await?;

        self.emit_with(handle, move |run| {
            let found = capabilities.len();
            run.context.capabilities = capabilities;
            event(WorkflowEventType::CapabilityDiscoveryCompleted, &run.run_id)
                .with_field("capabilities_found", found)
        })
        .await
    }

    async fn decide(&self, handle: &RunHandle) -> Step<()> {
        self.emit(handle, WorkflowEventType::AgentDecisionStarted)
            .await?;

        let input = handle.input().await;
        let execution = &self.inner.execution;
        let proposal = self
            .inner
            .runner
            .run(&handle.run_id, "agent_decision", || execution.decide(&input))
            .await?;

        self.emit_with(handle, move |run| {
            let completed = event(WorkflowEventType::AgentDecisionCompleted, &run.run_id)
                .with_field("action", proposal.action.clone())
                .with_field("plan_steps", proposal.steps.len());
            run.context.proposal = Some(proposal);
            completed
        })
        .await
    }

    async fn validate(&self, handle: &RunHandle) -> Step<RiskAssessment> {
        self.emit(handle, WorkflowEventType::PolicyValidationStarted)
            .await?;

        let input = handle.input().await;
        let classifier = &self.inner.classifier;
        let risk = self
            .inner
            .runner
            .run(&handle.run_id, "policy_validation", || async {
                Ok::<_, StageError>(classifier.classify(&input).await)
            })
            .await?;

        debug!(
            run_id = %handle.run_id,
            level = %risk.level,
            operation = %risk.operation,
            "Risk classified"
        );

        let mut run = handle.run.lock().await;
        if run.is_terminal() {
            return Err(Interrupt::Halted);
        }
        run.context.risk = Some(risk.clone());
        Ok(risk)
    }

    /// Open the approval gate and move the run to AWAITING_APPROVAL
    async fn suspend(&self, handle: &RunHandle, risk: &RiskAssessment) -> Step<()> {
        let mut run = handle.run.lock().await;
        if run.is_terminal() {
            return Err(Interrupt::Halted);
        }

        let mut request = ApprovalRequest::new(
            handle.run_id.clone(),
            risk.operation.clone(),
            risk.level,
            risk.description.clone(),
            handle.approval_timeout,
        )
        .with_metadata("task_description", Value::from(run.task_description.clone()))
        .with_metadata("user_id", Value::from(run.user_id.clone()));
        if let Some(proposal) = &run.context.proposal {
            request = request.with_metadata("action", Value::from(proposal.action.clone()));
        }

        // the gate must exist before anyone can observe AWAITING_APPROVAL
        self.inner
            .coordinator
            .request_approval(&handle.run_id, request.clone(), handle.approval_timeout)
            .await;

        run.transition(RunState::AwaitingApproval {
            request: request.clone(),
        })
        .map_err(|err| halt(&handle.run_id, err))?;

        let required = event(WorkflowEventType::ApprovalRequired, &handle.run_id)
            .with_field("operation", request.operation.clone())
            .with_field("risk_level", request.risk_level.as_str())
            .with_approval_request(request);
        self.record(handle, &mut run, required).await;
        self.save_snapshot(&run).await;

        info!(
            run_id = %handle.run_id,
            operation = %risk.operation,
            risk_level = %risk.level,
            "Run suspended for approval"
        );
        handle.publish_status(RunStatus::AwaitingApproval, Some(run.to_result()));
        Ok(())
    }

    async fn approval_gate(&self, handle: &RunHandle, wait: Duration) -> Step<()> {
        let record = tokio::select! {
            biased;
            _ = handle.finished() => return Err(Interrupt::Halted),
            record = self.inner.coordinator.await_decision(&handle.run_id, wait) => record,
        };

        match record.decision {
            ApprovalDecision::Approved => {
                self.resume(handle, move |run| {
                    let approved = decision_event(WorkflowEventType::ApprovalApproved, &record);
                    run.context.decision = Some(record);
                    approved
                })
                .await
            }
            ApprovalDecision::Timeout => {
                self.emit_with(handle, move |run| {
                    let timed_out = decision_event(WorkflowEventType::ApprovalTimeout, &record);
                    run.context.decision = Some(record);
                    timed_out
                })
                .await?;
                self.conclude_failed(handle, APPROVAL_TIMEOUT_ERROR.to_string())
                    .await
            }
            ApprovalDecision::Rejected => self.rejected(handle, record).await,
        }
    }

    async fn rejected(&self, handle: &RunHandle, record: ApprovalDecisionRecord) -> Step<()> {
        let approver = record.approver_id.clone();
        let reason = record.reason.clone();
        let alternative = record.alternative_action.clone();

        self.emit_with(handle, move |run| {
            let rejected = decision_event(WorkflowEventType::ApprovalRejected, &record);
            run.context.decision = Some(record);
            rejected
        })
        .await?;

        let Some(raw) = alternative else {
            let message = match reason {
                Some(reason) => format!("Approval rejected by {approver}: {reason}"),
                None => format!("Approval rejected by {approver}"),
            };
            return self.conclude_failed(handle, message).await;
        };

        let action = match AlternativeAction::parse(&raw) {
            Ok(action) => action,
            Err(err) => return self.conclude_failed(handle, err.to_string()).await,
        };

        let alternatives = &self.inner.alternatives;
        let run_id = &handle.run_id;
        let outcome = self
            .inner
            .runner
            .run(run_id, "alternative_action", || async {
                Ok::<_, StageError>(alternatives.execute(run_id, &action).await)
            })
            .await?;

        info!(
            run_id = %run_id,
            action = %action,
            succeeded = outcome.status.is_success(),
            "Alternative action executed"
        );

        let succeeded = outcome.status.is_success();
        let failure = outcome
            .error
            .clone()
            .unwrap_or_else(|| outcome.status.as_str().to_string());
        let executed = move |run: &mut Run| {
            let executed = event(WorkflowEventType::AlternativeActionExecuted, &run.run_id)
                .with_field("action", action.to_string())
                .with_field("result", serde_json::to_value(&outcome).unwrap_or_default());
            run.context.alternative_result = Some(outcome);
            executed
        };

        if succeeded {
            self.resume(handle, executed).await
        } else {
            self.emit_with(handle, executed).await?;
            self.conclude_failed(handle, format!("Alternative action failed: {failure}"))
                .await
        }
    }

    async fn process(&self, handle: &RunHandle) -> Step<()> {
        self.emit(handle, WorkflowEventType::ResultProcessingStarted)
            .await?;

        let input = handle.input().await;
        let execution = &self.inner.execution;
        let output = self
            .inner
            .runner
            .run(&handle.run_id, "result_processing", || {
                execution.process_result(&input)
            })
            .await?;

        self.emit_with(handle, |run| {
            event(WorkflowEventType::ResultProcessingCompleted, &run.run_id)
                .with_field("result_status", "success")
        })
        .await?;

        let run = self.lock_active(handle).await?;
        let completed =
            event(WorkflowEventType::WorkflowCompleted, &handle.run_id).with_field("output", output.clone());
        self.finish(handle, run, RunState::Success { output }, completed)
            .await;
        Ok(())
    }

    // ── Terminal Paths ───────────────────────────────────────────────

    /// End the run as FAILED and stop the pipeline
    async fn conclude_failed(&self, handle: &RunHandle, reason: String) -> Step<()> {
        let run = self.lock_active(handle).await?;
        warn!(run_id = %handle.run_id, reason = %reason, "Run failed");
        let failed =
            event(WorkflowEventType::WorkflowFailed, &handle.run_id).with_field("reason", reason.clone());
        self.finish(handle, run, RunState::failed(reason), failed)
            .await;
        Err(Interrupt::Halted)
    }

    async fn fail(&self, handle: &RunHandle, err: &StageError) {
        let run = handle.run.lock().await;
        if run.is_terminal() {
            return;
        }

        error!(run_id = %handle.run_id, stage = err.stage(), error = %err, "Stage fault");
        let message = err.to_string();
        let failed = event(WorkflowEventType::WorkflowFailed, &handle.run_id)
            .with_field("error", message.clone())
            .with_field("stage", err.stage());
        self.finish(handle, run, RunState::failed(message), failed)
            .await;
    }

    async fn expire(&self, handle: &RunHandle) {
        let mut run = handle.run.lock().await;
        if run.is_terminal() {
            return;
        }

        if run.status() == RunStatus::AwaitingApproval {
            let record = self
                .inner
                .coordinator
                .resolve_open(
                    &handle.run_id,
                    ApprovalDecision::Timeout,
                    SYSTEM_APPROVER,
                    Some(DEADLINE_REASON.to_string()),
                    None,
                )
                .await;

            if let Some(record) = record {
                let seen = run
                    .context
                    .decision
                    .as_ref()
                    .is_some_and(|d| d.approval_id == record.approval_id);
                if record.decision == ApprovalDecision::Timeout && !seen {
                    let timed_out = decision_event(WorkflowEventType::ApprovalTimeout, &record);
                    run.context.decision = Some(record);
                    self.record(handle, &mut run, timed_out).await;
                }
            }
        }

        warn!(run_id = %handle.run_id, status = %run.status(), "Run deadline exceeded");
        let failed = event(WorkflowEventType::WorkflowFailed, &handle.run_id)
            .with_field("reason", EXECUTION_TIMEOUT)
            .with_field("status", RunStatus::Timeout.as_str());
        self.finish(handle, run, RunState::timeout(EXECUTION_TIMEOUT), failed)
            .await;
    }

    async fn finish(
        &self,
        handle: &RunHandle,
        mut run: MutexGuard<'_, Run>,
        state: RunState,
        terminal: WorkflowEvent,
    ) {
        if let Err(err) = run.transition(state) {
            warn!(run_id = %handle.run_id, error = %err, "Dropped terminal transition");
            return;
        }
        self.record(handle, &mut run, terminal).await;
        self.finalize(handle, run).await;
    }

    /// Persist the terminal snapshot, release the run's resources and wake
    /// every waiter. Called with the run lock held and the run terminal.
    pub(crate) async fn finalize(&self, handle: &RunHandle, run: MutexGuard<'_, Run>) {
        self.save_snapshot(&run).await;
        let result = run.to_result();

        self.inner.coordinator.cleanup(&handle.run_id);
        self.inner.runs.remove(&handle.run_id);
        handle.close_stream();
        handle.callbacks.dispatch_finished(&result);

        info!(
            run_id = %handle.run_id,
            status = %result.status,
            events = result.events.len(),
            duration_secs = result.duration_secs.unwrap_or_default(),
            "Run finished"
        );

        handle.publish_status(result.status, Some(result));
        drop(run);
    }

    // ── Event Plumbing ───────────────────────────────────────────────

    /// Append an event to the run, publish it and forward it to the stream
    pub(crate) async fn record(&self, handle: &RunHandle, run: &mut Run, event: WorkflowEvent) {
        let event = run.push_event(event).clone();
        self.inner.sink.publish(&event, &handle.callbacks).await;
        handle.forward(&event);
    }

    async fn emit(&self, handle: &RunHandle, event_type: WorkflowEventType) -> Step<()> {
        self.emit_with(handle, move |run| event(event_type, &run.run_id))
            .await
    }

    async fn emit_with(
        &self,
        handle: &RunHandle,
        build: impl FnOnce(&mut Run) -> WorkflowEvent + Send,
    ) -> Step<()> {
        let mut run = self.lock_active(handle).await?;
        let event = build(&mut run);
        self.record(handle, &mut run, event).await;
        Ok(())
    }

    /// Move the run from the approval gate back to RUNNING
    async fn resume(
        &self,
        handle: &RunHandle,
        build: impl FnOnce(&mut Run) -> WorkflowEvent + Send,
    ) -> Step<()> {
        let mut run = self.lock_active(handle).await?;
        run.transition(RunState::Running)
            .map_err(|err| halt(&handle.run_id, err))?;
        let event = build(&mut run);
        self.record(handle, &mut run, event).await;
        self.save_snapshot(&run).await;
        handle.publish_status(RunStatus::Running, None);
        Ok(())
    }

    async fn lock_active<'a>(&self, handle: &'a RunHandle) -> Step<MutexGuard<'a, Run>> {
        let run = handle.run.lock().await;
        if run.is_terminal() {
            debug!(run_id = %handle.run_id, status = %run.status(), "Pipeline halted");
            return Err(Interrupt::Halted);
        }
        Ok(run)
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub(crate) async fn save_snapshot(&self, run: &Run) {
        if let Err(err) = self.inner.persistence.save_run_snapshot(run).await {
            warn!(run_id = %run.run_id, error = %err, "Failed to persist run snapshot");
        }
    }

    pub(crate) async fn save_cancellation(&self, record: &workflow_types::CancellationRecord) {
        if let Err(err) = self.inner.persistence.save_cancellation(record).await {
            warn!(run_id = %record.run_id, error = %err, "Failed to persist cancellation");
        }
    }
}

fn halt(run_id: &RunId, err: workflow_types::OrchestratorError) -> Interrupt {
    warn!(run_id = %run_id, error = %err, "Rejected status transition");
    Interrupt::Halted
}

/// Approval time left on a persisted request
fn remaining_wait(request: &ApprovalRequest) -> Duration {
    let elapsed = (chrono::Utc::now() - request.created_at)
        .to_std()
        .unwrap_or_default();
    request.timeout().saturating_sub(elapsed)
}
