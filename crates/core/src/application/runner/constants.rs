// Scheduler constants (no magic values)

/// Default pool capacity (in-flight units per runner)
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Upper bound accepted for a batch retry budget
pub const MAX_RETRIES: u32 = 1_000;

/// Maximum batch label length
pub const MAX_LABEL_LEN: usize = 64;
