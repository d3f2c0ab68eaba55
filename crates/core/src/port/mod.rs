// Port Layer - Interfaces for external collaborators

pub mod clock;
pub mod id_provider; // For deterministic testing
pub mod work_unit;

// Re-exports
pub use clock::{Clock, SystemClock};
pub use id_provider::{IdProvider, UuidProvider};
pub use work_unit::{shared_fn, unit_fn, FnUnit, SharedUnit, WorkUnit};
