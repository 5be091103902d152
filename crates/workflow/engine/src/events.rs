//! Event sink and push callbacks
//!
//! Every event a run produces goes through [`EventSink::publish`], which
//! persists it to the event log (when enabled), dispatches the run's
//! [`WorkflowCallbacks`] synchronously, and broadcasts it to live
//! subscribers. Persistence failures are logged and swallowed; pipeline
//! correctness never depends on the event log.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use workflow_persistence::PersistenceManager;
use workflow_types::{ApprovalRequest, RunId, WorkflowEvent, WorkflowEventType, WorkflowResult};

/// Callback receiving a run id
pub type RunHandler = Arc<dyn Fn(&RunId) + Send + Sync>;
/// Callback receiving a run id and the approver
pub type ApproverHandler = Arc<dyn Fn(&RunId, &str) + Send + Sync>;
/// Callback receiving an approval request
pub type RequestHandler = Arc<dyn Fn(&ApprovalRequest) + Send + Sync>;
/// Callback receiving a finished result
pub type ResultHandler = Arc<dyn Fn(&WorkflowResult) + Send + Sync>;
/// Callback receiving every event
pub type EventHandler = Arc<dyn Fn(&WorkflowEvent) + Send + Sync>;

/// Optional push callbacks for one run
///
/// Callbacks run on the run's own task and must return quickly. A panic
/// inside a callback is caught and logged.
#[derive(Clone, Default)]
pub struct WorkflowCallbacks {
    on_workflow_started: Option<RunHandler>,
    on_approval_required: Option<RequestHandler>,
    on_approval_approved: Option<ApproverHandler>,
    on_approval_rejected: Option<ApproverHandler>,
    on_approval_timeout: Option<RunHandler>,
    on_workflow_completed: Option<ResultHandler>,
    on_workflow_failed: Option<ResultHandler>,
    on_event: Option<EventHandler>,
}

impl std::fmt::Debug for WorkflowCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCallbacks")
            .field("on_workflow_started", &self.on_workflow_started.is_some())
            .field("on_approval_required", &self.on_approval_required.is_some())
            .field("on_approval_approved", &self.on_approval_approved.is_some())
            .field("on_approval_rejected", &self.on_approval_rejected.is_some())
            .field("on_approval_timeout", &self.on_approval_timeout.is_some())
            .field("on_workflow_completed", &self.on_workflow_completed.is_some())
            .field("on_workflow_failed", &self.on_workflow_failed.is_some())
            .field("on_event", &self.on_event.is_some())
            .finish()
    }
}

impl WorkflowCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_workflow_started(mut self, f: impl Fn(&RunId) + Send + Sync + 'static) -> Self {
        self.on_workflow_started = Some(Arc::new(f));
        self
    }

    pub fn on_approval_required(
        mut self,
        f: impl Fn(&ApprovalRequest) + Send + Sync + 'static,
    ) -> Self {
        self.on_approval_required = Some(Arc::new(f));
        self
    }

    pub fn on_approval_approved(mut self, f: impl Fn(&RunId, &str) + Send + Sync + 'static) -> Self {
        self.on_approval_approved = Some(Arc::new(f));
        self
    }

    pub fn on_approval_rejected(mut self, f: impl Fn(&RunId, &str) + Send + Sync + 'static) -> Self {
        self.on_approval_rejected = Some(Arc::new(f));
        self
    }

    pub fn on_approval_timeout(mut self, f: impl Fn(&RunId) + Send + Sync + 'static) -> Self {
        self.on_approval_timeout = Some(Arc::new(f));
        self
    }

    pub fn on_workflow_completed(
        mut self,
        f: impl Fn(&WorkflowResult) + Send + Sync + 'static,
    ) -> Self {
        self.on_workflow_completed = Some(Arc::new(f));
        self
    }

    /// Called for FAILED, TIMEOUT and CANCELLED results
    pub fn on_workflow_failed(mut self, f: impl Fn(&WorkflowResult) + Send + Sync + 'static) -> Self {
        self.on_workflow_failed = Some(Arc::new(f));
        self
    }

    pub fn on_event(mut self, f: impl Fn(&WorkflowEvent) + Send + Sync + 'static) -> Self {
        self.on_event = Some(Arc::new(f));
        self
    }

    /// Dispatch the event-driven callbacks for one event
    pub fn dispatch_event(&self, event: &WorkflowEvent) {
        let run_id = &event.run_id;
        let approver = event.field_str("approver_id").unwrap_or_default();

        match event.event_type {
            WorkflowEventType::WorkflowStarted => {
                guarded("on_workflow_started", &self.on_workflow_started, |f| f(run_id))
            }
            WorkflowEventType::ApprovalRequired => {
                if let Some(request) = &event.approval_request {
                    guarded("on_approval_required", &self.on_approval_required, |f| f(request))
                }
            }
            WorkflowEventType::ApprovalApproved => {
                guarded("on_approval_approved", &self.on_approval_approved, |f| f(run_id, approver))
            }
            WorkflowEventType::ApprovalRejected => {
                guarded("on_approval_rejected", &self.on_approval_rejected, |f| f(run_id, approver))
            }
            WorkflowEventType::ApprovalTimeout => {
                guarded("on_approval_timeout", &self.on_approval_timeout, |f| f(run_id))
            }
            _ => {}
        }

        guarded("on_event", &self.on_event, |f| f(event));
    }

    /// Dispatch the completion callbacks for a finished run
    pub fn dispatch_finished(&self, result: &WorkflowResult) {
        if result.is_success() {
            guarded("on_workflow_completed", &self.on_workflow_completed, |f| f(result));
        } else {
            guarded("on_workflow_failed", &self.on_workflow_failed, |f| f(result));
        }
    }
}

fn guarded<F: ?Sized>(name: &'static str, handler: &Option<Arc<F>>, call: impl FnOnce(&F)) {
    if let Some(handler) = handler {
        if catch_unwind(AssertUnwindSafe(|| call(handler.as_ref()))).is_err() {
            warn!(callback = name, "Workflow callback panicked");
        }
    }
}

// ── Event Sink ───────────────────────────────────────────────────────

/// Persists, dispatches and broadcasts workflow events
pub struct EventSink {
    persistence: Arc<dyn PersistenceManager>,
    enable_logging: bool,
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventSink {
    pub fn new(persistence: Arc<dyn PersistenceManager>, enable_logging: bool, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            persistence,
            enable_logging,
            sender,
        }
    }

    /// Publish one event
    pub async fn publish(&self, event: &WorkflowEvent, callbacks: &WorkflowCallbacks) {
        if self.enable_logging {
            if let Err(err) = self.persistence.save_event(event).await {
                warn!(
                    run_id = %event.run_id,
                    event_type = %event.event_type,
                    error = %err,
                    "Failed to persist workflow event"
                );
            }
        }

        callbacks.dispatch_event(event);

        // Broadcast (ignore errors if no receivers)
        let _ = self.sender.send(event.clone());
    }

    /// Subscribe to events from every run
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }
}
