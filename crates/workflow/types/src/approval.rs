//! Approval requests, decisions and cancellation records
//!
//! An [`ApprovalRequest`] is raised when the policy stage flags a risky
//! operation. It is immutable once created. Each gate instance ends with one
//! authoritative [`ApprovalDecisionRecord`], produced either by an explicit
//! decision or by the timeout path (approver [`SYSTEM_APPROVER`](crate::SYSTEM_APPROVER)).

use crate::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ── Risk Level ───────────────────────────────────────────────────────

/// Risk classification attached to an approval request
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for RiskLevel {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Verdict of a risk classifier for one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    /// Name of the operation being judged
    pub operation: String,
    pub description: String,
}

impl RiskAssessment {
    pub fn new(level: RiskLevel, operation: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            level,
            operation: operation.into(),
            description: description.into(),
        }
    }
}

// ── Approval Request ─────────────────────────────────────────────────

/// A request for a human decision on a risky operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub run_id: RunId,
    /// Name of the operation awaiting approval
    pub operation: String,
    pub risk_level: RiskLevel,
    pub description: String,
    /// How long the gate stays open before it resolves as TIMEOUT
    pub timeout_secs: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ApprovalRequest {
    pub fn new(
        run_id: RunId,
        operation: impl Into<String>,
        risk_level: RiskLevel,
        description: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            run_id,
            operation: operation.into(),
            risk_level,
            description: description.into(),
            timeout_secs: timeout.as_secs_f64(),
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// The gate timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }
}

// ── Decisions ────────────────────────────────────────────────────────

/// Unique identifier for an approval decision record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of an approval gate
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
            ApprovalDecision::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ApprovalDecision::Approved),
            "rejected" => Ok(ApprovalDecision::Rejected),
            "timeout" => Ok(ApprovalDecision::Timeout),
            other => Err(format!("unknown approval decision: {other}")),
        }
    }
}

impl PartialEq<&str> for ApprovalDecision {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Append-only audit record of a gate outcome
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecisionRecord {
    pub approval_id: ApprovalId,
    pub run_id: RunId,
    pub decision: ApprovalDecision,
    pub approver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Substitute action chosen on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_action: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl ApprovalDecisionRecord {
    pub fn new(run_id: RunId, decision: ApprovalDecision, approver_id: impl Into<String>) -> Self {
        Self {
            approval_id: ApprovalId::generate(),
            run_id,
            decision,
            approver_id: approver_id.into(),
            reason: None,
            alternative_action: None,
            decided_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach a substitute action. Ignored unless the decision is a rejection.
    pub fn with_alternative_action(mut self, action: impl Into<String>) -> Self {
        if self.decision == ApprovalDecision::Rejected {
            self.alternative_action = Some(action.into());
        }
        self
    }

    pub fn is_approved(&self) -> bool {
        self.decision == ApprovalDecision::Approved
    }
}

// ── Cancellation ─────────────────────────────────────────────────────

/// Audit record written when a run is cancelled
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub run_id: RunId,
    pub cancelled_by: String,
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

impl CancellationRecord {
    pub fn new(run_id: RunId, cancelled_by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            cancelled_by: cancelled_by.into(),
            reason: reason.into(),
            cancelled_at: Utc::now(),
        }
    }
}
