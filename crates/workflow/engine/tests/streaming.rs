//! The streaming surface

mod common;

use common::*;
use futures::StreamExt;
use std::time::Duration;
use workflow_engine::testing::{ScriptedExecutionLayer, CAPABILITY_DISCOVERY};
use workflow_engine::{ApprovalSubmission, RunOptions};
use workflow_types::{OrchestratorError, RunStatus, WorkflowEventType};

#[tokio::test]
async fn test_stream_yields_every_event_then_ends() {
    let (engine, _store) = engine();

    let stream = engine.stream_run(SAFE_TASK, RunOptions::new());
    let run_id = stream.run_id().clone();
    let events: Vec<_> = stream.collect().await;

    assert_eq!(events.first().map(|e| e.event_type), Some(WorkflowEventType::WorkflowStarted));
    assert_eq!(events.last().map(|e| e.event_type), Some(WorkflowEventType::WorkflowCompleted));
    assert_eq!(events.iter().filter(|e| e.event_type.is_terminal()).count(), 1);
    assert!(events.iter().all(|e| e.run_id == run_id));
    assert_ordered(&events);

    assert_eq!(engine.get_history(&run_id).await.unwrap(), events);
}

#[tokio::test]
async fn test_stream_stays_ended_after_terminal_event() {
    let (engine, _store) = engine();

    let mut stream = engine.stream_run(SAFE_TASK, RunOptions::new());
    while stream.next().await.is_some() {}

    assert!(stream.next().await.is_none());
    assert!(stream.next().await.is_none());
    assert_eq!(engine.get_status(stream.run_id()).await.unwrap(), RunStatus::Success);
}

#[tokio::test]
async fn test_stream_is_lazy() {
    let (engine, _store) = engine();

    let mut stream = engine.stream_run(SAFE_TASK, RunOptions::new());
    let run_id = stream.run_id().clone();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        engine.get_status(&run_id).await,
        Err(OrchestratorError::WorkflowNotFound(_))
    ));

    let first = stream.next().await.unwrap();
    assert_eq!(first.run_id, run_id);
    assert!(engine.get_status(&run_id).await.is_ok());
}

#[tokio::test]
async fn test_approve_while_iterating() {
    let (engine, _store) = engine();

    let mut stream = engine.stream_run(RISKY_TASK, RunOptions::new());
    let run_id = stream.run_id().clone();
    let mut seen = Vec::new();

    while let Some(event) = stream.next().await {
        let event_type = event.event_type;
        seen.push(event);
        if event_type == WorkflowEventType::ApprovalRequired {
            let record = engine
                .submit_approval(&run_id, ApprovalSubmission::approve("alice"))
                .await
                .unwrap();
            assert!(record.is_approved());
        }
    }

    let names = event_names(&seen);
    assert!(names.contains(&"approval_required"));
    assert!(names.contains(&"approval_approved"));
    assert_eq!(names.last(), Some(&"workflow_completed"));
    assert_ordered(&seen);
    assert_eq!(engine.get_status(&run_id).await.unwrap(), RunStatus::Success);
}

#[tokio::test]
async fn test_submission_while_running_is_rejected() {
    let layer = ScriptedExecutionLayer::new()
        .with_delay(CAPABILITY_DISCOVERY, Duration::from_millis(300));
    let (engine, _store) = scripted(layer);

    let mut stream = engine.stream_run(RISKY_TASK, RunOptions::new());
    let run_id = stream.run_id().clone();
    stream.next().await.unwrap();

    let err = engine
        .submit_approval(&run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::NotAwaitingApproval { status: RunStatus::Running, .. }
    ));
}

#[tokio::test]
async fn test_dropping_the_stream_does_not_stop_the_run() {
    let (engine, _store) = engine();

    let mut stream = engine.stream_run(SAFE_TASK, RunOptions::new());
    let run_id = stream.run_id().clone();
    stream.next().await.unwrap();
    drop(stream);

    let status = wait_terminal(&engine, &run_id, Duration::from_secs(2)).await;
    assert_eq!(status, RunStatus::Success);
}
