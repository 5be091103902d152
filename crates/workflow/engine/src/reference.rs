//! Reference collaborators
//!
//! Deterministic implementations used when no real execution layer is
//! wired in. They are also what the test suite runs against.

use crate::error::StageResult;
use crate::traits::{AlternativeActionExecutor, ExecutionLayer, RiskClassifier, StageInput};
use async_trait::async_trait;
use serde_json::{json, Value};
use workflow_types::{
    AgentProposal, AlternativeAction, AlternativeActionResult, AlternativeActionStatus,
    RiskAssessment, RiskLevel, RunId,
};

/// Execution layer that simulates each stage without side effects
#[derive(Debug, Clone, Default)]
pub struct SimulatedExecutionLayer;

#[async_trait]
impl ExecutionLayer for SimulatedExecutionLayer {
    async fn discover_capabilities(&self, _input: &StageInput) -> StageResult<Vec<String>> {
        Ok(vec![
            "read_file".to_string(),
            "write_file".to_string(),
            "run_command".to_string(),
            "search".to_string(),
            "http_request".to_string(),
        ])
    }

    async fn decide(&self, input: &StageInput) -> StageResult<AgentProposal> {
        Ok(AgentProposal {
            action: input.task_description.clone(),
            steps: vec![
                "analyze".to_string(),
                "execute".to_string(),
                "verify".to_string(),
            ],
        })
    }

    async fn process_result(&self, input: &StageInput) -> StageResult<Value> {
        let mut output = json!({
            "result": "Workflow completed successfully",
            "task": input.task_description,
        });
        if let Some(alt) = &input.context.alternative_result {
            output["alternative_action"] = json!(alt);
        }
        Ok(output)
    }
}

/// Flags tasks mentioning "deploy" or "delete" as high risk
#[derive(Debug, Clone)]
pub struct KeywordRiskClassifier {
    keywords: Vec<String>,
}

impl Default for KeywordRiskClassifier {
    fn default() -> Self {
        Self::new(["deploy", "delete"])
    }
}

impl KeywordRiskClassifier {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }
}

#[async_trait]
impl RiskClassifier for KeywordRiskClassifier {
    async fn classify(&self, input: &StageInput) -> RiskAssessment {
        let task = input.task_description.to_lowercase();
        if self.keywords.iter().any(|k| task.contains(k.as_str())) {
            RiskAssessment::new(
                RiskLevel::High,
                "risky_operation",
                format!("Operation requires approval: {}", input.task_description),
            )
        } else {
            RiskAssessment::new(RiskLevel::Low, "standard_operation", "No approval required")
        }
    }
}

/// Alternative-action executor that reports what it would have done
///
/// Commands are never spawned.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAlternativeExecutor;

#[async_trait]
impl AlternativeActionExecutor for SimulatedAlternativeExecutor {
    async fn execute(&self, run_id: &RunId, action: &AlternativeAction) -> AlternativeActionResult {
        tracing::info!(run_id = %run_id, action = %action, "Executing alternative action");
        match action {
            AlternativeAction::RunCommand(command) => {
                AlternativeActionResult::new(AlternativeActionStatus::Executed, action)
                    .with_command(command.clone())
                    .with_output(format!("Executed: {command}"), 0)
            }
            AlternativeAction::SkipStep => {
                AlternativeActionResult::new(AlternativeActionStatus::Skipped, action)
            }
            AlternativeAction::Other(raw) => {
                AlternativeActionResult::new(AlternativeActionStatus::Unknown, action)
                    .with_error(format!("Unknown action: {raw}"))
            }
        }
    }
}
