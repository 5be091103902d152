#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use workflow_engine::{ExecutionLayer, OrchestratorConfig, WorkflowEngine};
use workflow_persistence::InMemoryPersistence;
use workflow_types::{RunId, RunStatus, WorkflowEvent};

pub const RISKY_TASK: &str = "Deploy to production";
pub const SAFE_TASK: &str = "Process data";

pub fn engine() -> (WorkflowEngine, Arc<InMemoryPersistence>) {
    engine_with(OrchestratorConfig::default())
}

pub fn engine_with(config: OrchestratorConfig) -> (WorkflowEngine, Arc<InMemoryPersistence>) {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::builder()
        .with_config(config)
        .with_persistence(store.clone())
        .build();
    (engine, store)
}

pub fn scripted(layer: impl ExecutionLayer + 'static) -> (WorkflowEngine, Arc<InMemoryPersistence>) {
    let store = Arc::new(InMemoryPersistence::new());
    let engine = WorkflowEngine::builder()
        .with_persistence(store.clone())
        .with_execution_layer(Arc::new(layer))
        .build();
    (engine, store)
}

/// Poll until the run is terminal or `limit` elapses
pub async fn wait_terminal(engine: &WorkflowEngine, run_id: &RunId, limit: Duration) -> RunStatus {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let status = engine.get_status(run_id).await.unwrap();
        if status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn event_names(events: &[WorkflowEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}

/// Sequences start at zero and timestamps never move backward
pub fn assert_ordered(events: &[WorkflowEvent]) {
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, i as u64, "sequence gap at {i}");
    }
    for pair in events.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp, "time moved backward");
    }
}
