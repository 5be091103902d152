//! Persistence boundary: failure tolerance, rehydration, history queries

mod common;

use common::*;
use std::sync::Arc;
use workflow_engine::testing::{CallbackRecorder, FailingPersistence, FailingWrites};
use workflow_engine::{ApprovalSubmission, OrchestratorConfig, RunOptions, WorkflowEngine};
use workflow_persistence::{EventStorage, InMemoryPersistence, SnapshotStorage};
use workflow_types::{
    ApprovalDecision, ApprovalHistoryFilter, RunStatus, WorkflowEventType, WorkflowHistoryFilter,
};

#[tokio::test]
async fn test_failing_writes_never_break_a_run() {
    let store = Arc::new(FailingPersistence::new(FailingWrites::all()));
    let engine = WorkflowEngine::builder().with_persistence(store.clone()).build();
    let recorder = CallbackRecorder::new();

    let done = engine.start_run(SAFE_TASK, RunOptions::new()).await;
    assert_eq!(done.status, RunStatus::Success);

    let suspended = engine
        .start_run(RISKY_TASK, RunOptions::new().with_callbacks(recorder.callbacks()))
        .await;
    assert_eq!(suspended.status, RunStatus::AwaitingApproval);

    let record = engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap();
    assert_eq!(record.decision, ApprovalDecision::Approved);
    assert_eq!(recorder.entries().last().map(String::as_str), Some("completed"));

    assert!(store.inner().get_events(&done.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_event_log_failure_keeps_snapshots() {
    let store = Arc::new(FailingPersistence::new(FailingWrites::events_only()));
    let engine = WorkflowEngine::builder().with_persistence(store.clone()).build();

    let result = engine.start_run(SAFE_TASK, RunOptions::new()).await;
    assert_eq!(result.status, RunStatus::Success);

    assert!(store.inner().get_events(&result.run_id).await.unwrap().is_empty());
    assert_eq!(engine.get_history(&result.run_id).await.unwrap(), result.events);
}

#[tokio::test]
async fn test_event_logging_can_be_disabled() {
    let config = OrchestratorConfig {
        enable_event_logging: false,
        ..OrchestratorConfig::default()
    };
    let (quiet, store) = engine_with(config);
    let result = quiet.start_run(SAFE_TASK, RunOptions::new()).await;
    assert!(store.get_events(&result.run_id).await.unwrap().is_empty());

    let (logged, store) = engine();
    let result = logged.start_run(SAFE_TASK, RunOptions::new()).await;
    assert_eq!(store.get_events(&result.run_id).await.unwrap(), result.events);
}

#[tokio::test]
async fn test_suspended_run_resumes_in_a_new_engine() {
    let store = Arc::new(InMemoryPersistence::new());
    let first = WorkflowEngine::builder().with_persistence(store.clone()).build();

    let suspended = first.start_run(RISKY_TASK, RunOptions::new().with_user("carol")).await;
    assert_eq!(suspended.status, RunStatus::AwaitingApproval);

    let snapshot = store.load_run_snapshot(&suspended.run_id).await.unwrap().unwrap();
    assert_eq!(snapshot.status(), RunStatus::AwaitingApproval);
    assert!(snapshot.context.risk.is_some());

    // a restarted process sharing the same store
    let second = WorkflowEngine::builder().with_persistence(store.clone()).build();
    assert_eq!(
        second.get_status(&suspended.run_id).await.unwrap(),
        RunStatus::AwaitingApproval
    );

    let record = second
        .submit_approval(&suspended.run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap();
    assert!(record.is_approved());

    let run = second.get_run(&suspended.run_id).await.unwrap();
    assert_eq!(run.status(), RunStatus::Success);
    assert_eq!(run.user_id, "carol");
    assert_ordered(&run.events);
    let names = event_names(&run.events);
    assert_eq!(names.iter().filter(|n| **n == "workflow_started").count(), 1);
    assert!(names.contains(&"approval_approved"));
    assert_eq!(names.last(), Some(&"workflow_completed"));
}

#[tokio::test]
async fn test_cancel_run_known_only_from_snapshot() {
    let store = Arc::new(InMemoryPersistence::new());
    let first = WorkflowEngine::builder().with_persistence(store.clone()).build();
    let suspended = first.start_run(RISKY_TASK, RunOptions::new()).await;

    let second = WorkflowEngine::builder().with_persistence(store.clone()).build();
    assert!(second.cancel_run(&suspended.run_id).await.unwrap());

    let run = second.get_run(&suspended.run_id).await.unwrap();
    assert_eq!(run.status(), RunStatus::Cancelled);
    assert_eq!(
        run.events.last().map(|e| e.event_type),
        Some(WorkflowEventType::WorkflowCancelled)
    );
}

#[tokio::test]
async fn test_history_queries() {
    let (engine, _store) = engine();

    engine
        .start_run(SAFE_TASK, RunOptions::new().with_user("dave").with_agent_role("analyst"))
        .await;
    engine
        .start_run(SAFE_TASK, RunOptions::new().with_user("erin"))
        .await;
    let suspended = engine
        .start_run(RISKY_TASK, RunOptions::new().with_user("dave"))
        .await;
    engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::reject("bob"))
        .await
        .unwrap();

    let daves = engine
        .query_workflow_history(&WorkflowHistoryFilter::default().user("dave"))
        .await
        .unwrap();
    assert_eq!(daves.len(), 2);

    let failed = engine
        .query_workflow_history(&WorkflowHistoryFilter::default().user("dave").status(RunStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].run_id, suspended.run_id);

    let analysts = engine
        .query_workflow_history(&WorkflowHistoryFilter::default().agent_role("analyst"))
        .await
        .unwrap();
    assert_eq!(analysts.len(), 1);

    let page = engine
        .query_workflow_history(&WorkflowHistoryFilter::default().page(1, 1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    let bobs = engine
        .query_approval_history(
            &ApprovalHistoryFilter::default()
                .approver("bob")
                .status(ApprovalDecision::Rejected),
        )
        .await
        .unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].run_id, suspended.run_id);
}

#[tokio::test]
async fn test_callbacks_follow_the_run() {
    let (engine, _store) = engine();

    let recorder = CallbackRecorder::new();
    let suspended = engine
        .start_run(RISKY_TASK, RunOptions::new().with_callbacks(recorder.callbacks()))
        .await;
    engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap();
    assert_eq!(
        recorder.entries(),
        vec![
            "started",
            "approval_required:risky_operation",
            "approved:alice",
            "completed"
        ]
    );

    let recorder = CallbackRecorder::new();
    let suspended = engine
        .start_run(RISKY_TASK, RunOptions::new().with_callbacks(recorder.callbacks()))
        .await;
    engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::reject("bob"))
        .await
        .unwrap();
    assert_eq!(
        recorder.entries(),
        vec![
            "started",
            "approval_required:risky_operation",
            "rejected:bob",
            "failed:failed"
        ]
    );
}
