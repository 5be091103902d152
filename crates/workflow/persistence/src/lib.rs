//! Persistence boundary for the workflow orchestrator
//!
//! The engine talks to storage only through [`PersistenceManager`], which is
//! split into per-concern traits the same way the daemon storage layer is:
//!
//! - [`SnapshotStorage`]: typed run snapshots keyed by `run_id`
//! - [`EventStorage`]: the per-run event log
//! - [`ApprovalStorage`]: approval requests and the decision audit trail
//! - [`CancellationStorage`]: cancellation records
//! - [`HistoryStorage`]: workflow summaries for history queries
//!
//! Only [`InMemoryPersistence`] ships here. Relational, key-value or file
//! backends implement the same traits and are responsible for their own
//! per-key write atomicity (`run_id`, `approval_id`).

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod traits;

pub use error::PersistenceError;
pub use memory::InMemoryPersistence;
pub use traits::*;
