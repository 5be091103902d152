//! Workflow Types for the approval-gated orchestrator
//!
//! This crate defines the vocabulary shared by the engine and every
//! persistence backend: runs, their status machine, approval requests and
//! decisions, events, and the derived result view.
//!
//! # Key Concepts
//!
//! - **Run**: one execution attempt of a task through the staged pipeline
//! - **RunState**: a tagged union with one variant per status, so a persisted
//!   snapshot never has to be probed for optional fields
//! - **Approval gate**: a suspension point that needs an external decision
//! - **ApprovalDecisionRecord**: append-only audit entry; at most one is
//!   authoritative per gate instance
//! - **WorkflowEvent**: append-only, strictly ordered per run
//!
//! # Stable identifiers
//!
//! Status strings are `pending`, `running`, `awaiting_approval`, `success`,
//! `failed`, `timeout`, `cancelled`. Decision strings are `approved`,
//! `rejected`, `timeout`.

#![deny(unsafe_code)]

pub mod action;
pub mod approval;
pub mod errors;
pub mod event;
pub mod history;
pub mod result;
pub mod run;
pub mod status;

pub use action::*;
pub use approval::*;
pub use errors::*;
pub use event::*;
pub use history::*;
pub use result::*;
pub use run::*;
pub use status::*;

/// Approver id recorded on decisions produced by the timeout path.
pub const SYSTEM_APPROVER: &str = "system";
