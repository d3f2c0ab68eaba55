// Domain Layer - Scheduling entities and invariants

pub mod batch;
pub mod error;
pub mod queue;

// Re-exports
pub use batch::{BatchId, BatchReport, BatchSnapshot, BatchStatus, UnitFailure, UnitId};
pub use error::DomainError;
pub use queue::{Placement, WaitQueue};
