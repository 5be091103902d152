//! History queries: approval decisions and workflow summaries
//!
//! Filters are conjunctive: every field that is set must match. Pagination
//! is offset/limit over insertion order.

use crate::{ApprovalDecision, ApprovalDecisionRecord, Run, RunId, RunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size for history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

fn default_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// Filter for approval decision history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalHistoryFilter {
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub approver_id: Option<String>,
    #[serde(default)]
    pub status: Option<ApprovalDecision>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for ApprovalHistoryFilter {
    fn default() -> Self {
        Self {
            run_id: None,
            approver_id: None,
            status: None,
            limit: DEFAULT_HISTORY_LIMIT,
            offset: 0,
        }
    }
}

impl ApprovalHistoryFilter {
    pub fn for_run(run_id: RunId) -> Self {
        Self {
            run_id: Some(run_id),
            ..Default::default()
        }
    }

    pub fn approver(mut self, approver_id: impl Into<String>) -> Self {
        self.approver_id = Some(approver_id.into());
        self
    }

    pub fn status(mut self, status: ApprovalDecision) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn matches(&self, record: &ApprovalDecisionRecord) -> bool {
        self.run_id.as_ref().map_or(true, |id| &record.run_id == id)
            && self
                .approver_id
                .as_ref()
                .map_or(true, |a| &record.approver_id == a)
            && self.status.map_or(true, |s| record.decision == s)
    }
}

/// Summary of a run kept for workflow history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistoryEntry {
    pub run_id: RunId,
    pub task_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    pub user_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Run> for WorkflowHistoryEntry {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            task_description: run.task_description.clone(),
            agent_role: run.agent_role.clone(),
            user_id: run.user_id.clone(),
            status: run.status(),
            error: run.state.error().map(str::to_string),
            created_at: run.created_at,
            updated_at: run.updated_at,
            completed_at: run.completed_at,
        }
    }
}

/// Filter for workflow history
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHistoryFilter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub agent_role: Option<String>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl Default for WorkflowHistoryFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            agent_role: None,
            status: None,
            limit: DEFAULT_HISTORY_LIMIT,
            offset: 0,
        }
    }
}

impl WorkflowHistoryFilter {
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub fn matches(&self, entry: &WorkflowHistoryEntry) -> bool {
        self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self
                .agent_role
                .as_ref()
                .map_or(true, |r| entry.agent_role.as_ref() == Some(r))
            && self.status.map_or(true, |s| entry.status == s)
    }
}

/// Apply conjunctive filtering and offset/limit pagination to an ordered sequence
pub fn paginate<'a, T: Clone + 'a>(
    items: impl IntoIterator<Item = &'a T>,
    matches: impl Fn(&T) -> bool,
    offset: usize,
    limit: usize,
) -> Vec<T> {
    items
        .into_iter()
        .filter(|item| matches(item))
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}
