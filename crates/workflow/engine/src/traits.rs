//! External collaborator seams
//!
//! The engine coordinates stages but never performs stage work itself.
//! Reasoning and tool execution sit behind [`ExecutionLayer`], risk judgement
//! behind [`RiskClassifier`], and substitute actions chosen on rejection
//! behind [`AlternativeActionExecutor`].

use crate::error::StageResult;
use async_trait::async_trait;
use serde_json::Value;
use workflow_types::{
    AgentProposal, AlternativeAction, AlternativeActionResult, RiskAssessment, Run, RunContext,
    RunId,
};

/// Read-only view of a run handed to collaborators
#[derive(Clone, Debug)]
pub struct StageInput {
    pub run_id: RunId,
    pub task_description: String,
    pub agent_role: Option<String>,
    pub user_id: String,
    pub context: RunContext,
}

impl From<&Run> for StageInput {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.run_id.clone(),
            task_description: run.task_description.clone(),
            agent_role: run.agent_role.clone(),
            user_id: run.user_id.clone(),
            context: run.context.clone(),
        }
    }
}

/// Performs the work of the capability, decision and result stages
#[async_trait]
pub trait ExecutionLayer: Send + Sync {
    /// Capabilities available to the agent for this task
    async fn discover_capabilities(&self, input: &StageInput) -> StageResult<Vec<String>>;

    /// What the agent proposes to do
    async fn decide(&self, input: &StageInput) -> StageResult<AgentProposal>;

    /// Final output of the run. `input.context` carries the approval
    /// decision and any substituted alternative-action result.
    async fn process_result(&self, input: &StageInput) -> StageResult<Value>;
}

/// Judges how risky a proposed operation is
#[async_trait]
pub trait RiskClassifier: Send + Sync {
    async fn classify(&self, input: &StageInput) -> RiskAssessment;
}

/// Interprets the substitute action an approver chose on rejection
///
/// Failures are reported through the result's status, not as errors.
#[async_trait]
pub trait AlternativeActionExecutor: Send + Sync {
    async fn execute(&self, run_id: &RunId, action: &AlternativeAction) -> AlternativeActionResult;
}
