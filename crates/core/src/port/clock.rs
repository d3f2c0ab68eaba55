// Clock Port (for testability)

/// Wall clock used for batch report timestamps (allows mocking in tests)
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

/// System clock (production)
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

pub mod mocks {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Deterministic clock: every read advances by `step_ms`
    pub struct SteppingClock {
        now: AtomicI64,
        step_ms: i64,
    }

    impl SteppingClock {
        pub fn new(start_ms: i64, step_ms: i64) -> Self {
            Self {
                now: AtomicI64::new(start_ms),
                step_ms,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now_millis(&self) -> i64 {
            self.now.fetch_add(self.step_ms, Ordering::SeqCst)
        }
    }
}
