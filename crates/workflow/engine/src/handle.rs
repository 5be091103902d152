//! Per-run state held in the active-run registry

use crate::events::WorkflowCallbacks;
use crate::traits::StageInput;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use workflow_types::{Run, RunId, RunStatus, WorkflowEvent, WorkflowResult};

/// Handle to one active run
///
/// The run itself sits behind its own async mutex; no lock is shared across
/// runs. Status changes are published on a `watch` channel so callers can
/// wait for checkpoints without touching the run lock.
pub(crate) struct RunHandle {
    pub(crate) run_id: RunId,
    pub(crate) run: tokio::sync::Mutex<Run>,
    pub(crate) callbacks: WorkflowCallbacks,
    pub(crate) deadline: Instant,
    pub(crate) approval_timeout: Duration,
    status: watch::Sender<RunStatus>,
    checkpoint: Mutex<Option<WorkflowResult>>,
    stream: Mutex<Option<mpsc::UnboundedSender<WorkflowEvent>>>,
}

impl RunHandle {
    pub(crate) fn new(
        run: Run,
        callbacks: WorkflowCallbacks,
        deadline: Instant,
        approval_timeout: Duration,
        stream: Option<mpsc::UnboundedSender<WorkflowEvent>>,
    ) -> Self {
        let (status, _) = watch::channel(run.status());
        Self {
            run_id: run.run_id.clone(),
            run: tokio::sync::Mutex::new(run),
            callbacks,
            deadline,
            approval_timeout,
            status,
            checkpoint: Mutex::new(None),
            stream: Mutex::new(stream),
        }
    }

    pub(crate) fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Publish a status change. `result` is the view callers waiting on a
    /// checkpoint will receive.
    pub(crate) fn publish_status(&self, status: RunStatus, result: Option<WorkflowResult>) {
        if let Some(result) = result {
            if let Ok(mut slot) = self.checkpoint.lock() {
                *slot = Some(result);
            }
        }
        self.status.send_replace(status);
    }

    /// Wait until the run suspends at an approval gate or finishes
    pub(crate) async fn checkpoint(&self) -> WorkflowResult {
        let mut rx = self.status.subscribe();
        let _ = rx
            .wait_for(|s| s.is_terminal() || *s == RunStatus::AwaitingApproval)
            .await;

        let cached = self.checkpoint.lock().ok().and_then(|c| c.clone());
        match cached {
            Some(result) => result,
            None => self.run.lock().await.to_result(),
        }
    }

    /// Wait until the run reaches a terminal status
    pub(crate) async fn finished(&self) -> RunStatus {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    pub(crate) async fn input(&self) -> StageInput {
        StageInput::from(&*self.run.lock().await)
    }

    /// Forward an event to the streaming consumer, if any
    pub(crate) fn forward(&self, event: &WorkflowEvent) {
        if let Ok(stream) = self.stream.lock() {
            if let Some(tx) = stream.as_ref() {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Drop the stream sender so the consumer's sequence ends
    pub(crate) fn close_stream(&self) {
        if let Ok(mut stream) = self.stream.lock() {
            stream.take();
        }
    }
}
