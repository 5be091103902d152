//! Approval-gated workflow engine
//!
//! Runs a multi-stage task, suspends it for a human decision when the policy
//! stage judges the operation risky, and resumes it on an explicit decision
//! or an automatic timeout.
//!
//! # Key Principle
//!
//! **The engine coordinates, it NEVER performs stage work itself.**
//!
//! Reasoning and tool execution sit behind [`ExecutionLayer`], risk
//! judgement behind [`RiskClassifier`], and substitute actions behind
//! [`AlternativeActionExecutor`].
//!
//! # Architecture
//!
//! - [`WorkflowEngine`]: run lifecycle, the blocking and streaming surfaces
//! - [`ApprovalCoordinator`]: the pause/resume rendezvous, one authoritative
//!   decision per gate
//! - [`EventSink`]: event log persistence, callbacks, live broadcast
//! - [`StageRunner`]: per-stage timeout and retry
//! - [`OrchestratorConfig`]: layered configuration
//!
//! # Example
//!
//! ```rust
//! use workflow_engine::{ApprovalSubmission, RunOptions, WorkflowEngine};
//! use workflow_types::RunStatus;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = WorkflowEngine::default();
//!
//!     let result = engine.start_run("Deploy to production", RunOptions::new()).await;
//!     assert_eq!(result.status, RunStatus::AwaitingApproval);
//!
//!     let record = engine
//!         .submit_approval(&result.run_id, ApprovalSubmission::approve("alice"))
//!         .await
//!         .unwrap();
//!     assert!(record.is_approved());
//!     assert_eq!(engine.get_status(&result.run_id).await.unwrap(), RunStatus::Success);
//! }
//! ```

#![deny(unsafe_code)]

pub mod builder;
pub mod config;
pub mod coordinator;
mod driver;
pub mod engine;
pub mod error;
pub mod events;
mod handle;
pub mod logging;
pub mod reference;
pub mod runner;
pub mod stream;
pub mod testing;
pub mod traits;

// Re-export main types
pub use builder::WorkflowEngineBuilder;
pub use config::{LoggingConfig, OrchestratorConfig, StageConfig};
pub use coordinator::{ApprovalCoordinator, APPROVAL_TIMEOUT_REASON};
pub use driver::{APPROVAL_TIMEOUT_ERROR, DEADLINE_REASON, EXECUTION_TIMEOUT};
pub use engine::{ApprovalSubmission, RunOptions, WorkflowEngine, DEFAULT_USER};
pub use error::{StageError, StageResult};
pub use events::{EventSink, WorkflowCallbacks};
pub use logging::init_tracing;
pub use reference::{KeywordRiskClassifier, SimulatedAlternativeExecutor, SimulatedExecutionLayer};
pub use runner::StageRunner;
pub use stream::RunStream;
pub use traits::{AlternativeActionExecutor, ExecutionLayer, RiskClassifier, StageInput};
