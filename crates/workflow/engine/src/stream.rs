//! Streaming view of a single run

use crate::engine::{RunOptions, WorkflowEngine};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use workflow_types::{RunId, WorkflowEvent};

/// Deferred start of a run; consumed on the first poll
struct Launch {
    engine: WorkflowEngine,
    run_id: RunId,
    task: String,
    options: RunOptions,
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

/// Lazy, finite, non-restartable sequence of one run's events
///
/// The run starts on the first poll. The sequence ends right after the
/// run's terminal event, and polling past the end keeps yielding `None`.
pub struct RunStream {
    run_id: RunId,
    inner: BoxStream<'static, WorkflowEvent>,
}

impl RunStream {
    pub(crate) fn deferred(
        engine: WorkflowEngine,
        run_id: RunId,
        task: String,
        options: RunOptions,
        sender: mpsc::UnboundedSender<WorkflowEvent>,
        receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
    ) -> Self {
        let launch = Launch {
            engine,
            run_id: run_id.clone(),
            task,
            options,
            sender,
        };

        let inner = stream::unfold((Some(launch), receiver), |(launch, mut receiver)| async move {
            if let Some(launch) = launch {
                launch
                    .engine
                    .launch(launch.run_id, launch.task, launch.options, Some(launch.sender))
                    .await;
            }
            let event = receiver.recv().await?;
            Some((event, (None, receiver)))
        })
        .fuse()
        .boxed();

        Self { run_id, inner }
    }

    /// Id of the run this stream drives, known before it starts
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

impl std::fmt::Debug for RunStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStream")
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl Stream for RunStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
