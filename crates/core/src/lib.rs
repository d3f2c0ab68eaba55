// Ferry Core - Bounded Concurrent Request Scheduler
// NO infrastructure dependencies: configuration, terminals and transports live in the binary

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::batch::{BatchCoordinator, BatchError, BatchHandle, BatchOptions};
pub use application::runner::{Admission, RunnerConfig, RunnerStats, TaskRunner, UnitError};
pub use domain::Placement;
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
