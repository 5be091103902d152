//! In-memory persistence for development and testing
//!
//! Snapshots are stored in their serialized form so every load goes through
//! the same tagged-union schema a durable backend would use.

use crate::error::PersistenceError;
use crate::traits::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use workflow_types::{
    paginate, ApprovalDecisionRecord, ApprovalHistoryFilter, ApprovalId, ApprovalRequest,
    CancellationRecord, Run, RunId, WorkflowEvent, WorkflowHistoryEntry, WorkflowHistoryFilter,
};

#[derive(Debug, Default)]
struct HistoryIndex {
    entries: Vec<WorkflowHistoryEntry>,
    positions: HashMap<RunId, usize>,
}

impl HistoryIndex {
    fn upsert(&mut self, entry: WorkflowHistoryEntry) {
        match self.positions.get(&entry.run_id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(entry.run_id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}

#[derive(Debug, Default)]
struct DecisionLog {
    records: Vec<ApprovalDecisionRecord>,
    ids: HashMap<ApprovalId, usize>,
}

/// In-memory persistence backend
#[derive(Debug, Clone)]
pub struct InMemoryPersistence {
    snapshots: Arc<RwLock<HashMap<RunId, serde_json::Value>>>,
    events: Arc<RwLock<HashMap<RunId, Vec<WorkflowEvent>>>>,
    requests: Arc<RwLock<HashMap<RunId, Vec<ApprovalRequest>>>>,
    decisions: Arc<RwLock<DecisionLog>>,
    cancellations: Arc<RwLock<HashMap<RunId, CancellationRecord>>>,
    history: Arc<RwLock<HistoryIndex>>,
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            events: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(HashMap::new())),
            decisions: Arc::new(RwLock::new(DecisionLog::default())),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(HistoryIndex::default())),
        }
    }

    /// Number of stored snapshots
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStorage for InMemoryPersistence {
    async fn save_run_snapshot(&self, run: &Run) -> PersistenceResult<()> {
        let value = serde_json::to_value(run)?;
        self.snapshots.write().await.insert(run.run_id.clone(), value);
        self.history.write().await.upsert(WorkflowHistoryEntry::from(run));
        Ok(())
    }

    async fn load_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<Option<Run>> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(run_id) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn delete_run_snapshot(&self, run_id: &RunId) -> PersistenceResult<bool> {
        Ok(self.snapshots.write().await.remove(run_id).is_some())
    }
}

#[async_trait]
impl EventStorage for InMemoryPersistence {
    async fn save_event(&self, event: &WorkflowEvent) -> PersistenceResult<()> {
        let mut events = self.events.write().await;
        events
            .entry(event.run_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn get_events(&self, run_id: &RunId) -> PersistenceResult<Vec<WorkflowEvent>> {
        let events = self.events.read().await;
        Ok(events.get(run_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ApprovalStorage for InMemoryPersistence {
    async fn save_approval_request(&self, request: &ApprovalRequest) -> PersistenceResult<()> {
        let mut requests = self.requests.write().await;
        requests
            .entry(request.run_id.clone())
            .or_default()
            .push(request.clone());
        Ok(())
    }

    async fn get_approval_request(
        &self,
        run_id: &RunId,
    ) -> PersistenceResult<Option<ApprovalRequest>> {
        let requests = self.requests.read().await;
        Ok(requests.get(run_id).and_then(|all| all.last().cloned()))
    }

    async fn save_approval_decision(
        &self,
        record: &ApprovalDecisionRecord,
    ) -> PersistenceResult<()> {
        let mut log = self.decisions.write().await;
        if log.ids.contains_key(&record.approval_id) {
            return Err(PersistenceError::DuplicateApproval(record.approval_id.clone()));
        }
        let pos = log.records.len();
        log.ids.insert(record.approval_id.clone(), pos);
        log.records.push(record.clone());
        Ok(())
    }

    async fn get_approval_history(
        &self,
        filter: &ApprovalHistoryFilter,
    ) -> PersistenceResult<Vec<ApprovalDecisionRecord>> {
        let log = self.decisions.read().await;
        Ok(paginate(
            &log.records,
            |r| filter.matches(r),
            filter.offset,
            filter.limit,
        ))
    }
}

#[async_trait]
impl CancellationStorage for InMemoryPersistence {
    async fn save_cancellation(&self, record: &CancellationRecord) -> PersistenceResult<()> {
        self.cancellations
            .write()
            .await
            .insert(record.run_id.clone(), record.clone());
        Ok(())
    }

    async fn get_cancellation(
        &self,
        run_id: &RunId,
    ) -> PersistenceResult<Option<CancellationRecord>> {
        Ok(self.cancellations.read().await.get(run_id).cloned())
    }
}

#[async_trait]
impl HistoryStorage for InMemoryPersistence {
    async fn get_workflow_history(
        &self,
        filter: &WorkflowHistoryFilter,
    ) -> PersistenceResult<Vec<WorkflowHistoryEntry>> {
        let history = self.history.read().await;
        Ok(paginate(
            &history.entries,
            |e| filter.matches(e),
            filter.offset,
            filter.limit,
        ))
    }
}

#[async_trait]
impl PersistenceManager for InMemoryPersistence {
    async fn clear(&self) -> PersistenceResult<()> {
        self.snapshots.write().await.clear();
        self.events.write().await.clear();
        self.requests.write().await.clear();
        *self.decisions.write().await = DecisionLog::default();
        self.cancellations.write().await.clear();
        *self.history.write().await = HistoryIndex::default();
        tracing::debug!("In-memory persistence cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use workflow_types::{
        ApprovalDecision, RiskLevel, RunState, RunStatus, WorkflowEventType,
    };

    fn running_run(id: &str, user: &str, role: Option<&str>) -> Run {
        let mut run = Run::new(RunId::new(id), format!("task for {id}"), user)
            .with_agent_role(role.map(str::to_string));
        run.transition(RunState::Running).unwrap();
        run
    }

    #[tokio::test]
    async fn test_snapshot_round_trip_and_delete() {
        let store = InMemoryPersistence::new();
        let run = running_run("r1", "u1", Some("dev"));

        store.save_run_snapshot(&run).await.unwrap();
        assert_eq!(store.snapshot_count().await, 1);
        let loaded = store.load_run_snapshot(&run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, run);

        assert!(store.delete_run_snapshot(&run.run_id).await.unwrap());
        assert!(!store.delete_run_snapshot(&run.run_id).await.unwrap());
        assert!(store.load_run_snapshot(&run.run_id).await.unwrap().is_none());

        // history outlives the snapshot
        let history = store
            .get_workflow_history(&WorkflowHistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_decision_round_trip() {
        let store = InMemoryPersistence::new();
        let record = ApprovalDecisionRecord::new(RunId::new("r1"), ApprovalDecision::Rejected, "alice")
            .with_reason("tests first")
            .with_alternative_action("run_command: npm test");

        store.save_approval_decision(&record).await.unwrap();
        let history = store
            .get_approval_history(&ApprovalHistoryFilter::for_run(RunId::new("r1")))
            .await
            .unwrap();
        assert_eq!(history, vec![record]);
    }

    #[tokio::test]
    async fn test_duplicate_approval_id_rejected() {
        let store = InMemoryPersistence::new();
        let record = ApprovalDecisionRecord::new(RunId::new("r1"), ApprovalDecision::Approved, "alice");
        store.save_approval_decision(&record).await.unwrap();

        let err = store.save_approval_decision(&record).await.unwrap_err();
        assert!(matches!(err, PersistenceError::DuplicateApproval(_)));
        let all = store
            .get_approval_history(&ApprovalHistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_approval_history_filters_and_pages() {
        let store = InMemoryPersistence::new();
        for i in 0..6 {
            let decision = if i % 2 == 0 {
                ApprovalDecision::Approved
            } else {
                ApprovalDecision::Timeout
            };
            let approver = if decision == ApprovalDecision::Timeout { "system" } else { "alice" };
            let record = ApprovalDecisionRecord::new(RunId::new(format!("r{i}")), decision, approver);
            store.save_approval_decision(&record).await.unwrap();
        }

        let timeouts = store
            .get_approval_history(
                &ApprovalHistoryFilter::default()
                    .status(ApprovalDecision::Timeout)
                    .approver("system"),
            )
            .await
            .unwrap();
        let ids: Vec<_> = timeouts.iter().map(|r| r.run_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["r1", "r3", "r5"]);

        let page = store
            .get_approval_history(&ApprovalHistoryFilter::default().page(2, 3))
            .await
            .unwrap();
        let ids: Vec<_> = page.iter().map(|r| r.run_id.as_str().to_string()).collect();
        assert_eq!(ids, vec!["r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn test_workflow_history_upserts_and_filters() {
        let store = InMemoryPersistence::new();
        let mut a = running_run("a", "u1", Some("data_scientist"));
        let b = running_run("b", "u2", Some("dev"));
        let c = running_run("c", "u1", None);
        for run in [&a, &b, &c] {
            store.save_run_snapshot(run).await.unwrap();
        }

        a.transition(RunState::Success {
            output: serde_json::json!({}),
        })
        .unwrap();
        store.save_run_snapshot(&a).await.unwrap();

        let all = store
            .get_workflow_history(&WorkflowHistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].run_id, RunId::new("a"));
        assert_eq!(all[0].status, RunStatus::Success);

        let u1_running = store
            .get_workflow_history(
                &WorkflowHistoryFilter::default()
                    .user("u1")
                    .status(RunStatus::Running),
            )
            .await
            .unwrap();
        assert_eq!(u1_running.len(), 1);
        assert_eq!(u1_running[0].run_id, RunId::new("c"));

        let by_role = store
            .get_workflow_history(&WorkflowHistoryFilter::default().agent_role("dev"))
            .await
            .unwrap();
        assert_eq!(by_role[0].run_id, RunId::new("b"));
    }

    #[tokio::test]
    async fn test_events_requests_and_cancellations() {
        let store = InMemoryPersistence::new();
        let mut run = running_run("r1", "u1", None);
        let first = run.record(WorkflowEventType::WorkflowStarted).clone();
        let second = run.record(WorkflowEventType::WorkflowCancelled).clone();
        store.save_event(&first).await.unwrap();
        store.save_event(&second).await.unwrap();
        assert_eq!(store.get_events(&run.run_id).await.unwrap(), vec![first, second]);

        let request = ApprovalRequest::new(
            run.run_id.clone(),
            "risky_operation",
            RiskLevel::High,
            "needs approval",
            Duration::from_secs(5),
        );
        store.save_approval_request(&request).await.unwrap();
        assert_eq!(
            store.get_approval_request(&run.run_id).await.unwrap(),
            Some(request)
        );

        let cancel = CancellationRecord::new(run.run_id.clone(), "ops", "no longer needed");
        store.save_cancellation(&cancel).await.unwrap();
        assert_eq!(store.get_cancellation(&run.run_id).await.unwrap(), Some(cancel));

        store.clear().await.unwrap();
        assert!(store.get_events(&run.run_id).await.unwrap().is_empty());
        assert!(store.get_cancellation(&run.run_id).await.unwrap().is_none());
        assert!(store.get_approval_request(&run.run_id).await.unwrap().is_none());
    }
}
