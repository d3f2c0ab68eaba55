// Batch Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Batch ID (UUID v4)
pub type BatchId = String;

/// Batch-local unit sequence number, assigned at submission/insertion
pub type UnitId = usize;

/// Aggregate batch status.
///
/// `Pending -> Fulfilled` or `Pending -> Rejected`, each terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[default]
    Pending,
    Fulfilled,
    Rejected,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Pending => write!(f, "PENDING"),
            BatchStatus::Fulfilled => write!(f, "FULFILLED"),
            BatchStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl BatchStatus {
    pub fn is_pending(self) -> bool {
        self == BatchStatus::Pending
    }

    pub fn is_rejected(self) -> bool {
        self == BatchStatus::Rejected
    }

    /// Transition to Fulfilled
    pub fn fulfill(&mut self) -> Result<()> {
        self.leave_pending(BatchStatus::Fulfilled)
    }

    /// Transition to Rejected
    pub fn reject(&mut self) -> Result<()> {
        self.leave_pending(BatchStatus::Rejected)
    }

    fn leave_pending(&mut self, to: BatchStatus) -> Result<()> {
        if *self != BatchStatus::Pending {
            return Err(DomainError::InvalidStatusTransition {
                from: self.to_string(),
                to: to.to_string(),
            });
        }
        *self = to;
        Ok(())
    }
}

/// A unit that exhausted its retries (or could not be retried)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit_id: UnitId,
    /// Invocations made, including the failing one
    pub attempts: u32,
    pub reason: String,
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unit {} failed after {} attempt(s): {}",
            self.unit_id, self.attempts, self.reason
        )
    }
}

/// Counters of a settled batch, carried by both outcomes of `done()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: BatchId,
    pub label: Option<String>,
    /// Units handed to the batch, initial and inserted
    pub submitted: usize,
    pub succeeded: usize,
    pub retries_used: u32,
    /// Units dropped without running (cancel-on-failure)
    pub abandoned: usize,
    pub started_at: i64, // epoch ms
    pub finished_at: i64,
}

impl BatchReport {
    pub fn duration_ms(&self) -> i64 {
        self.finished_at - self.started_at
    }
}

/// Point-in-time view of a running batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: BatchId,
    pub label: Option<String>,
    pub status: BatchStatus,
    /// Units handed to the runner and not yet settled
    pub active: usize,
    /// Units held in the batch's own wait list
    pub waiting: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retries_used: u32,
    pub abandoned: usize,
}
