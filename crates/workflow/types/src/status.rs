//! Run status state machine
//!
//! ```text
//! PENDING ──▶ RUNNING ──▶ SUCCESS
//!               │  ▲  ╲──▶ FAILED
//!               ▼  │   ╲─▶ TIMEOUT / CANCELLED
//!        AWAITING_APPROVAL ──▶ FAILED / TIMEOUT / CANCELLED
//! ```
//!
//! The last four statuses are terminal: once reached, no further status
//! write is accepted.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, not yet executing
    Pending,
    /// Executing pipeline stages
    Running,
    /// Suspended at an approval gate
    AwaitingApproval,
    /// Completed cleanly
    Success,
    /// A stage faulted, or the approval gate ended in rejection or timeout
    Failed,
    /// The overall run deadline elapsed
    Timeout,
    /// Cancelled by an explicit request
    Cancelled,
}

impl RunStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [RunStatus; 7] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::AwaitingApproval,
        RunStatus::Success,
        RunStatus::Failed,
        RunStatus::Timeout,
        RunStatus::Cancelled,
    ];

    /// Whether no further transition is accepted from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success | RunStatus::Failed | RunStatus::Timeout | RunStatus::Cancelled
        )
    }

    /// Whether the run can still be cancelled
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::AwaitingApproval)
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, AwaitingApproval)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
                | (AwaitingApproval, Running)
                | (AwaitingApproval, Failed)
                | (AwaitingApproval, Timeout)
                | (AwaitingApproval, Cancelled)
        )
    }

    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::AwaitingApproval => "awaiting_approval",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Timeout => "timeout",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RunStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown run status: {s}"))
    }
}
