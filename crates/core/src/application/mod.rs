// Application Layer - Admission control and batch coordination

pub mod batch;
pub mod retry;
pub mod runner;

// Re-exports
pub use batch::{BatchCoordinator, BatchError, BatchHandle, BatchOptions, FailurePolicy};
pub use retry::{RetryBudget, RetryDecision, RetryScope};
pub use runner::{
    cancel_channel, Admission, CancelToken, CancelTrigger, RunnerConfig, RunnerStats,
    SubmitOptions, TaskRunner, UnitError,
};
