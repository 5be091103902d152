//! Stage fault types

use std::time::Duration;

/// A fault raised by pipeline stage work
///
/// Faults never escape `start_run` or `stream_run`; they end the run as
/// FAILED with the fault message as its error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("{stage} failed: {reason}")]
    Failed { stage: &'static str, reason: String },

    #[error("{stage} timed out after {elapsed:?}")]
    TimedOut {
        stage: &'static str,
        elapsed: Duration,
    },

    #[error("{stage} panicked: {message}")]
    Panicked { stage: &'static str, message: String },
}

impl StageError {
    pub fn failed(stage: &'static str, reason: impl Into<String>) -> Self {
        StageError::Failed {
            stage,
            reason: reason.into(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            StageError::Failed { stage, .. }
            | StageError::TimedOut { stage, .. }
            | StageError::Panicked { stage, .. } => stage,
        }
    }
}

/// Result type for stage work
pub type StageResult<T> = Result<T, StageError>;

/// Render a panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
