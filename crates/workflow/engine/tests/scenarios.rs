//! End-to-end runs through the reference collaborators

mod common;

use common::*;
use std::time::Duration;
use workflow_engine::{ApprovalSubmission, RunOptions};
use workflow_types::{
    ApprovalDecision, OrchestratorError, RiskLevel, RunId, RunStatus, WorkflowEventType,
    SYSTEM_APPROVER,
};

#[tokio::test]
async fn test_low_risk_task_completes_without_approval() {
    let (engine, _store) = engine();

    let result = engine
        .start_run(SAFE_TASK, RunOptions::new().with_agent_role("data_scientist"))
        .await;

    assert_eq!(result.status, RunStatus::Success);
    assert!(result.error.is_none());
    assert_eq!(
        result.output.as_ref().and_then(|o| o["result"].as_str()),
        Some("Workflow completed successfully")
    );
    assert_eq!(
        event_names(&result.events),
        vec![
            "workflow_started",
            "capability_discovery_started",
            "capability_discovery_completed",
            "agent_decision_started",
            "agent_decision_completed",
            "policy_validation_started",
            "policy_validation_completed",
            "result_processing_started",
            "result_processing_completed",
            "workflow_completed",
        ]
    );
    assert!(!result.has_event(WorkflowEventType::ApprovalRequired));
    assert_ordered(&result.events);
    assert!(result.completed_at.is_some());

    let started = &result.events[0];
    assert_eq!(started.field_str("task_description"), Some(SAFE_TASK));
    assert_eq!(started.field_str("agent_role"), Some("data_scientist"));
    assert_eq!(result.events[2].payload["capabilities_found"], 5);
    assert_eq!(result.events[4].payload["plan_steps"], 3);

    assert!(engine.active_runs().is_empty());
    assert_eq!(engine.get_status(&result.run_id).await.unwrap(), RunStatus::Success);
    assert!(engine.get_approval_history(&result.run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_risky_task_suspends_then_completes_on_approval() {
    let (engine, _store) = engine();

    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;
    assert_eq!(suspended.status, RunStatus::AwaitingApproval);
    assert_eq!(suspended.events.last().map(|e| e.event_type), Some(WorkflowEventType::ApprovalRequired));

    let request = suspended.approval_request.clone().unwrap();
    assert_eq!(request.operation, "risky_operation");
    assert_eq!(request.risk_level, RiskLevel::High);
    assert_eq!(request.description, format!("Operation requires approval: {RISKY_TASK}"));
    assert_eq!(
        suspended.events.last().unwrap().approval_request.as_ref(),
        Some(&request)
    );
    assert!(engine.coordinator().is_pending(&suspended.run_id));

    let record = engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::approve("alice").with_reason("change window open"),
        )
        .await
        .unwrap();
    assert_eq!(record.decision, ApprovalDecision::Approved);
    assert_eq!(record.approver_id, "alice");

    assert_eq!(engine.get_status(&suspended.run_id).await.unwrap(), RunStatus::Success);

    let history = engine.get_history(&suspended.run_id).await.unwrap();
    let names = event_names(&history);
    let required = names.iter().position(|n| *n == "approval_required").unwrap();
    let approved = names.iter().position(|n| *n == "approval_approved").unwrap();
    let validated = names.iter().position(|n| *n == "policy_validation_completed").unwrap();
    assert!(required < approved && approved < validated);
    assert_eq!(names.last(), Some(&"workflow_completed"));
    assert_eq!(history[approved].field_str("approver_id"), Some("alice"));
    assert_ordered(&history);

    let approvals = engine.get_approval_history(&suspended.run_id).await.unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].approval_id, record.approval_id);
    assert!(!engine.coordinator().is_pending(&suspended.run_id));
}

#[tokio::test]
async fn test_rejection_fails_the_run() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    let record = engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::reject("bob").with_reason("freeze in effect"),
        )
        .await
        .unwrap();
    assert_eq!(record.decision, ApprovalDecision::Rejected);

    let result = engine.get_result(&suspended.run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Approval rejected by bob: freeze in effect")
    );
    assert!(result.has_event(WorkflowEventType::ApprovalRejected));
    assert!(!result.has_event(WorkflowEventType::ResultProcessingStarted));
    assert_eq!(result.events.last().map(|e| e.event_type), Some(WorkflowEventType::WorkflowFailed));
}

#[tokio::test]
async fn test_rejection_with_alternative_command_succeeds() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    let record = engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::reject("bob").with_alternative_action("run_command: make deploy-staging"),
        )
        .await
        .unwrap();
    assert_eq!(
        record.alternative_action.as_deref(),
        Some("run_command: make deploy-staging")
    );

    let result = engine.get_result(&suspended.run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);

    let output = result.output.unwrap();
    assert_eq!(output["alternative_action"]["status"], "executed");
    assert_eq!(output["alternative_action"]["output"], "Executed: make deploy-staging");

    let names = event_names(&result.events);
    let rejected = names.iter().position(|n| *n == "approval_rejected").unwrap();
    let executed = names.iter().position(|n| *n == "alternative_action_executed").unwrap();
    assert!(rejected < executed);
    assert_eq!(names.last(), Some(&"workflow_completed"));
}

#[tokio::test]
async fn test_rejection_with_skip_step_succeeds() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::reject("bob").with_alternative_action("skip_step"),
        )
        .await
        .unwrap();

    let result = engine.get_result(&suspended.run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.output.unwrap()["alternative_action"]["status"], "skipped");
}

#[tokio::test]
async fn test_unknown_alternative_fails_the_run() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::reject("bob").with_alternative_action("page_oncall"),
        )
        .await
        .unwrap();

    let result = engine.get_result(&suspended.run_id).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("Alternative action failed: Unknown action: page_oncall")
    );
    assert!(result.has_event(WorkflowEventType::AlternativeActionExecuted));
}

#[tokio::test]
async fn test_malformed_alternative_is_rejected_before_resolution() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    let err = engine
        .submit_approval(
            &suspended.run_id,
            ApprovalSubmission::reject("bob").with_alternative_action("run_command:  "),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidAlternativeAction(_)));

    assert_eq!(
        engine.get_status(&suspended.run_id).await.unwrap(),
        RunStatus::AwaitingApproval
    );
    assert!(engine.coordinator().is_pending(&suspended.run_id));
}

#[tokio::test]
async fn test_approval_timeout_is_recorded_as_system_decision() {
    let (engine, _store) = engine();

    let suspended = engine
        .start_run(
            RISKY_TASK,
            RunOptions::new().with_approval_timeout(Duration::from_secs(1)),
        )
        .await;
    assert_eq!(suspended.status, RunStatus::AwaitingApproval);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let status = wait_terminal(&engine, &suspended.run_id, Duration::from_secs(2)).await;
    assert_eq!(status, RunStatus::Failed);

    let approvals = engine.get_approval_history(&suspended.run_id).await.unwrap();
    let latest = approvals.last().unwrap();
    assert_eq!(latest.decision, ApprovalDecision::Timeout);
    assert_eq!(latest.approver_id, SYSTEM_APPROVER);

    let result = engine.get_result(&suspended.run_id).await.unwrap();
    assert_eq!(result.error.as_deref(), Some("Approval timeout"));
    assert!(result.has_event(WorkflowEventType::ApprovalTimeout));
    assert_eq!(result.events.last().map(|e| e.event_type), Some(WorkflowEventType::WorkflowFailed));
}

#[tokio::test]
async fn test_submit_approval_error_taxonomy() {
    let (engine, _store) = engine();

    let err = engine
        .submit_approval(&RunId::new("missing"), ApprovalSubmission::approve("alice"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::WorkflowNotFound(_)));

    // an unknown run is reported before the alternative is looked at
    let err = engine
        .submit_approval(
            &RunId::new("missing"),
            ApprovalSubmission::reject("bob").with_alternative_action("  "),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::WorkflowNotFound(_)));

    let done = engine.start_run(SAFE_TASK, RunOptions::new()).await;
    let err = engine
        .submit_approval(&done.run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::AlreadyCompleted { status: RunStatus::Success, .. }
    ));
}

#[tokio::test]
async fn test_second_submission_after_completion_is_rejected() {
    let (engine, _store) = engine();
    let suspended = engine.start_run(RISKY_TASK, RunOptions::new()).await;

    engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::approve("alice"))
        .await
        .unwrap();
    let err = engine
        .submit_approval(&suspended.run_id, ApprovalSubmission::reject("bob"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyCompleted { .. }));

    let approvals = engine.get_approval_history(&suspended.run_id).await.unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].approver_id, "alice");
}

#[tokio::test]
async fn test_reads_on_unknown_run_fail() {
    let (engine, _store) = engine();
    let missing = RunId::new("nope");

    assert!(matches!(
        engine.get_status(&missing).await,
        Err(OrchestratorError::WorkflowNotFound(_))
    ));
    assert!(matches!(
        engine.get_history(&missing).await,
        Err(OrchestratorError::WorkflowNotFound(_))
    ));
    assert!(matches!(
        engine.get_approval_history(&missing).await,
        Err(OrchestratorError::WorkflowNotFound(_))
    ));
}
