//! Alternative actions chosen by an approver on rejection
//!
//! The accepted string forms are `run_command: <command>` and `skip_step`.
//! Any other non-empty string is carried through as [`AlternativeAction::Other`]
//! and left to the executor to interpret.

use crate::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};

const RUN_COMMAND_PREFIX: &str = "run_command:";
const SKIP_STEP: &str = "skip_step";

/// A parsed substitute action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AlternativeAction {
    RunCommand(String),
    SkipStep,
    Other(String),
}

impl AlternativeAction {
    /// Parse an alternative-action string.
    ///
    /// Empty input and a `run_command:` without a command are rejected.
    pub fn parse(raw: &str) -> OrchestratorResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OrchestratorError::InvalidAlternativeAction(
                "alternative action is empty".into(),
            ));
        }

        if let Some(command) = trimmed.strip_prefix(RUN_COMMAND_PREFIX) {
            let command = command.trim();
            if command.is_empty() {
                return Err(OrchestratorError::InvalidAlternativeAction(format!(
                    "missing command in '{trimmed}'"
                )));
            }
            return Ok(AlternativeAction::RunCommand(command.to_string()));
        }

        if trimmed == SKIP_STEP {
            return Ok(AlternativeAction::SkipStep);
        }

        Ok(AlternativeAction::Other(trimmed.to_string()))
    }
}

impl std::fmt::Display for AlternativeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlternativeAction::RunCommand(cmd) => write!(f, "{RUN_COMMAND_PREFIX} {cmd}"),
            AlternativeAction::SkipStep => f.write_str(SKIP_STEP),
            AlternativeAction::Other(raw) => f.write_str(raw),
        }
    }
}

impl std::str::FromStr for AlternativeAction {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlternativeAction::parse(s)
    }
}

// ── Execution Result ─────────────────────────────────────────────────

/// Status field of an alternative-action result
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeActionStatus {
    Executed,
    Skipped,
    Failed,
    Unknown,
}

impl AlternativeActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlternativeActionStatus::Executed => "executed",
            AlternativeActionStatus::Skipped => "skipped",
            AlternativeActionStatus::Failed => "failed",
            AlternativeActionStatus::Unknown => "unknown",
        }
    }

    /// Whether the substitute can stand in for the rejected operation
    pub fn is_success(&self) -> bool {
        matches!(self, AlternativeActionStatus::Executed | AlternativeActionStatus::Skipped)
    }
}

/// Structured result returned by an alternative-action executor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlternativeActionResult {
    pub status: AlternativeActionStatus,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AlternativeActionResult {
    pub fn new(status: AlternativeActionStatus, action: &AlternativeAction) -> Self {
        Self {
            status,
            action: action.to_string(),
            command: None,
            output: None,
            exit_code: None,
            error: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>, exit_code: i32) -> Self {
        self.output = Some(output.into());
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        assert_eq!(
            AlternativeAction::parse("run_command: npm test").unwrap(),
            AlternativeAction::RunCommand("npm test".into())
        );
        assert_eq!(
            AlternativeAction::parse("  run_command:ls -la ").unwrap(),
            AlternativeAction::RunCommand("ls -la".into())
        );
    }

    #[test]
    fn parses_skip_and_other() {
        assert_eq!(AlternativeAction::parse("skip_step").unwrap(), AlternativeAction::SkipStep);
        assert_eq!(
            AlternativeAction::parse("ask_again").unwrap(),
            AlternativeAction::Other("ask_again".into())
        );
    }

    #[test]
    fn rejects_empty_and_malformed() {
        for raw in ["", "   ", "run_command:", "run_command:   "] {
            let err = AlternativeAction::parse(raw).unwrap_err();
            assert!(matches!(err, OrchestratorError::InvalidAlternativeAction(_)), "{raw:?}");
        }
    }

    #[test]
    fn display_normalises_command_form() {
        let action: AlternativeAction = "run_command:npm test".parse().unwrap();
        assert_eq!(action.to_string(), "run_command: npm test");
    }

    #[test]
    fn success_statuses() {
        assert!(AlternativeActionStatus::Executed.is_success());
        assert!(AlternativeActionStatus::Skipped.is_success());
        assert!(!AlternativeActionStatus::Unknown.is_success());
        assert!(!AlternativeActionStatus::Failed.is_success());
    }
}
