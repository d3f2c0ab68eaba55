// Retry budget for batch units
use crate::domain::UnitId;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Who owns the retry counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Every unit gets its own `retries` attempts
    #[default]
    PerUnit,
    /// One counter of `retries` shared by the whole batch
    Shared,
}

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Resubmit the unit at the head of the queue
    Retry { remaining: u32 },
    /// Do not retry, the unit has failed permanently
    Failed,
}

/// Bounded retry accounting for one batch.
///
/// The counter is checked and decremented together: a budget of 0 means the
/// first failure is terminal.
#[derive(Debug)]
pub struct RetryBudget {
    scope: RetryScope,
    retries: u32,
    shared_left: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(retries: u32, scope: RetryScope) -> Self {
        Self {
            scope,
            retries,
            shared_left: retries,
            used: 0,
        }
    }

    /// Counter handed to each newly submitted unit
    pub fn unit_allowance(&self) -> u32 {
        match self.scope {
            RetryScope::PerUnit => self.retries,
            RetryScope::Shared => 0,
        }
    }

    /// Decide whether a failed unit gets another attempt
    ///
    /// `unit_left` is the unit's own counter; it is only consulted in
    /// `PerUnit` scope.
    pub fn should_retry(&mut self, unit_id: UnitId, unit_left: &mut u32) -> RetryDecision {
        let counter = match self.scope {
            RetryScope::PerUnit => unit_left,
            RetryScope::Shared => &mut self.shared_left,
        };

        if *counter == 0 {
            warn!(
                unit_id,
                scope = ?self.scope,
                retries_used = self.used,
                "Retry budget exhausted"
            );
            return RetryDecision::Failed;
        }

        *counter -= 1;
        let remaining = *counter;
        self.used += 1;

        info!(
            unit_id,
            scope = ?self.scope,
            remaining,
            "Scheduling retry"
        );

        RetryDecision::Retry { remaining }
    }

    /// Retries consumed so far
    pub fn used(&self) -> u32 {
        self.used
    }
}
