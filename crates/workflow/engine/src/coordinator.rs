//! Approval Coordinator: the pause/resume rendezvous for approval gates
//!
//! Each run has at most one open gate. A gate is resolved exactly once:
//! whichever of {an explicit [`resolve`](ApprovalCoordinator::resolve), the
//! timeout path} claims it first becomes the authoritative decision, and
//! every later attempt observes that record instead of writing its own.
//!
//! # Design
//!
//! - Claiming a gate happens under a per-gate async mutex, so the
//!   check-then-write is atomic without any lock spanning other runs.
//! - The winning record is published on a `watch` channel: one send, any
//!   number of waiters observe the same value.
//! - The timeout path (armed timer or an elapsed [`await_decision`]) goes
//!   through the same claim as explicit decisions.
//!
//! [`await_decision`]: ApprovalCoordinator::await_decision

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use workflow_persistence::PersistenceManager;
use workflow_types::{
    ApprovalDecision, ApprovalDecisionRecord, ApprovalRequest, RunId, SYSTEM_APPROVER,
};

/// Reason recorded when a gate closes because its wait elapsed
pub const APPROVAL_TIMEOUT_REASON: &str = "Approval timeout exceeded";

// ── Gate ─────────────────────────────────────────────────────────────

/// One approval gate instance
struct ApprovalGate {
    /// Claim slot; holding the lock is the right to decide
    claim: tokio::sync::Mutex<Option<ApprovalDecisionRecord>>,
    signal: watch::Sender<Option<ApprovalDecisionRecord>>,
    request: Mutex<Option<ApprovalRequest>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl ApprovalGate {
    fn new(request: Option<ApprovalRequest>) -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            claim: tokio::sync::Mutex::new(None),
            signal,
            request: Mutex::new(request),
            timer: Mutex::new(None),
        }
    }

    fn decision(&self) -> Option<ApprovalDecisionRecord> {
        self.signal.borrow().clone()
    }

    fn is_resolved(&self) -> bool {
        self.signal.borrow().is_some()
    }

    fn has_request(&self) -> bool {
        self.request.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    fn set_request(&self, request: ApprovalRequest) {
        if let Ok(mut slot) = self.request.lock() {
            *slot = Some(request);
        }
    }

    fn request(&self) -> Option<ApprovalRequest> {
        self.request.lock().ok().and_then(|r| r.clone())
    }

    fn arm(&self, timer: JoinHandle<()>) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(previous) = slot.replace(timer) {
                previous.abort();
            }
        }
    }

    /// Detach the timer without aborting it. Called by the timer itself.
    fn disarm(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            slot.take();
        }
    }

    fn cancel_timer(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(timer) = slot.take() {
                timer.abort();
            }
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────────

/// Owns every open approval gate
#[derive(Clone)]
pub struct ApprovalCoordinator {
    gates: Arc<DashMap<RunId, Arc<ApprovalGate>>>,
    persistence: Arc<dyn PersistenceManager>,
}

impl std::fmt::Debug for ApprovalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalCoordinator")
            .field("open_gates", &self.gates.len())
            .finish()
    }
}

impl ApprovalCoordinator {
    pub fn new(persistence: Arc<dyn PersistenceManager>) -> Self {
        Self {
            gates: Arc::new(DashMap::new()),
            persistence,
        }
    }

    /// Open a gate for `run_id`, persist the request, and arm a timer that
    /// resolves the gate as TIMEOUT once `timeout` elapses.
    ///
    /// A previous gate that was already decided is replaced. A gate that was
    /// created implicitly by an early `resolve` or `await_decision` is
    /// adopted, keeping any decision it already holds.
    pub async fn request_approval(
        &self,
        run_id: &RunId,
        request: ApprovalRequest,
        timeout: Duration,
    ) {
        let gate = match self.gates.entry(run_id.clone()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get().clone();
                if existing.is_resolved() && existing.has_request() {
                    let fresh = Arc::new(ApprovalGate::new(Some(request.clone())));
                    entry.insert(fresh.clone());
                    fresh
                } else {
                    existing.set_request(request.clone());
                    existing
                }
            }
            Entry::Vacant(entry) => {
                let fresh = Arc::new(ApprovalGate::new(Some(request.clone())));
                entry.insert(fresh.clone());
                fresh
            }
        };

        if let Err(err) = self.persistence.save_approval_request(&request).await {
            error!(run_id = %run_id, error = %err, "Failed to persist approval request");
        }

        if gate.is_resolved() {
            return;
        }

        let coordinator = self.clone();
        let timer_gate = gate.clone();
        let timer_run = run_id.clone();
        gate.arm(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_gate.disarm();
            coordinator
                .claim(
                    &timer_gate,
                    &timer_run,
                    ApprovalDecision::Timeout,
                    SYSTEM_APPROVER,
                    Some(APPROVAL_TIMEOUT_REASON.to_string()),
                    None,
                )
                .await;
        }));

        info!(
            run_id = %run_id,
            operation = %request.operation,
            risk_level = %request.risk_level,
            timeout = ?timeout,
            "Approval requested"
        );
    }

    /// Resolve the gate for `run_id`, creating it if none is open.
    ///
    /// The first call for a gate is authoritative. Later calls are no-ops
    /// that return the authoritative record.
    pub async fn resolve(
        &self,
        run_id: &RunId,
        decision: ApprovalDecision,
        approver_id: &str,
        reason: Option<String>,
        alternative_action: Option<String>,
    ) -> ApprovalDecisionRecord {
        let gate = self.gate(run_id);
        self.claim(&gate, run_id, decision, approver_id, reason, alternative_action)
            .await
    }

    /// Resolve the gate only if one is currently open for `run_id`.
    pub async fn resolve_open(
        &self,
        run_id: &RunId,
        decision: ApprovalDecision,
        approver_id: &str,
        reason: Option<String>,
        alternative_action: Option<String>,
    ) -> Option<ApprovalDecisionRecord> {
        let gate = self.gates.get(run_id).map(|g| g.clone())?;
        Some(
            self.claim(&gate, run_id, decision, approver_id, reason, alternative_action)
                .await,
        )
    }

    /// Wait until the gate for `run_id` is resolved, or resolve it as
    /// TIMEOUT once `timeout` elapses.
    pub async fn await_decision(&self, run_id: &RunId, timeout: Duration) -> ApprovalDecisionRecord {
        let gate = self.gate(run_id);
        let mut rx = gate.signal.subscribe();

        let observed = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => value.clone(),
            Ok(Err(_)) | Err(_) => None,
        };

        match observed {
            Some(record) => record,
            None => {
                debug!(run_id = %run_id, "Approval wait elapsed");
                self.claim(
                    &gate,
                    run_id,
                    ApprovalDecision::Timeout,
                    SYSTEM_APPROVER,
                    Some(APPROVAL_TIMEOUT_REASON.to_string()),
                    None,
                )
                .await
            }
        }
    }

    /// Release the wait handle for `run_id`. Decision records are kept.
    pub fn cleanup(&self, run_id: &RunId) {
        if let Some((_, gate)) = self.gates.remove(run_id) {
            gate.cancel_timer();
            debug!(run_id = %run_id, "Approval gate released");
        }
    }

    /// Whether an undecided gate is open for `run_id`
    pub fn is_pending(&self, run_id: &RunId) -> bool {
        self.gates
            .get(run_id)
            .map(|g| !g.is_resolved())
            .unwrap_or(false)
    }

    /// Decision of the currently held gate, if it has one
    pub fn decision(&self, run_id: &RunId) -> Option<ApprovalDecisionRecord> {
        self.gates.get(run_id).and_then(|g| g.decision())
    }

    /// Request of the currently held gate
    pub fn pending_request(&self, run_id: &RunId) -> Option<ApprovalRequest> {
        self.gates.get(run_id).and_then(|g| g.request())
    }

    /// Number of gates currently held in memory
    pub fn open_gates(&self) -> usize {
        self.gates.len()
    }

    fn gate(&self, run_id: &RunId) -> Arc<ApprovalGate> {
        self.gates
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(ApprovalGate::new(None)))
            .clone()
    }

    async fn claim(
        &self,
        gate: &Arc<ApprovalGate>,
        run_id: &RunId,
        decision: ApprovalDecision,
        approver_id: &str,
        reason: Option<String>,
        alternative_action: Option<String>,
    ) -> ApprovalDecisionRecord {
        let mut slot = gate.claim.lock().await;
        if let Some(existing) = slot.as_ref() {
            debug!(
                run_id = %run_id,
                attempted = %decision,
                authoritative = %existing.decision,
                "Approval gate already resolved"
            );
            return existing.clone();
        }

        let mut record = ApprovalDecisionRecord::new(run_id.clone(), decision, approver_id);
        if let Some(reason) = reason {
            record = record.with_reason(reason);
        }
        if let Some(action) = alternative_action {
            record = record.with_alternative_action(action);
        }

        *slot = Some(record.clone());
        gate.signal.send_replace(Some(record.clone()));
        drop(slot);
        gate.cancel_timer();

        // the write runs on its own task so a dropped claimant cannot leave
        // a saved record behind an unclaimed gate
        let persistence = self.persistence.clone();
        let saved = record.clone();
        let write = tokio::spawn(async move {
            if let Err(err) = persistence.save_approval_decision(&saved).await {
                error!(
                    run_id = %saved.run_id,
                    approval_id = %saved.approval_id,
                    error = %err,
                    "Failed to persist approval decision"
                );
            }
        });
        if let Err(err) = write.await {
            error!(run_id = %run_id, error = %err, "Approval decision write aborted");
        }

        info!(
            run_id = %run_id,
            decision = %record.decision,
            approver = %record.approver_id,
            "Approval gate resolved"
        );
        record
    }
}
