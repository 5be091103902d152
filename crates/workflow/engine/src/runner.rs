//! Per-stage timeout and retry
//!
//! Every execution-layer call goes through [`StageRunner::run`]. A panic
//! inside stage work is caught and surfaces as [`StageError::Panicked`] so a
//! misbehaving collaborator cannot take the run's task down with it.

use crate::config::StageConfig;
use crate::error::{panic_message, StageError, StageResult};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use workflow_types::RunId;

/// Executes stage work with an optional deadline and fixed-delay retries
#[derive(Debug, Clone)]
pub struct StageRunner {
    timeout: Option<Duration>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Default for StageRunner {
    fn default() -> Self {
        Self::from_config(&StageConfig::default())
    }
}

impl StageRunner {
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retries(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, run_id: &RunId, stage: &'static str, mut op: F) -> StageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StageResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let guarded = AssertUnwindSafe(op()).catch_unwind();

            let outcome = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(outcome) => outcome,
                    Err(_) => Ok(Err(StageError::TimedOut {
                        stage,
                        elapsed: started.elapsed(),
                    })),
                },
                None => guarded.await,
            };

            let result = outcome.unwrap_or_else(|payload| {
                Err(StageError::Panicked {
                    stage,
                    message: panic_message(payload.as_ref()),
                })
            });

            match result {
                Ok(value) => {
                    debug!(run_id = %run_id, stage, attempt, "Stage completed");
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        run_id = %run_id,
                        stage,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Stage failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
