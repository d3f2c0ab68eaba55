// Work Unit Port
// The only thing the scheduler needs from the outside world: an operation it can invoke

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A re-invocable asynchronous unit of work.
///
/// Each call to [`WorkUnit::run`] is a fresh invocation producing exactly one
/// outcome. The batch coordinator calls `run` again for every retry, never
/// resuming a previous attempt.
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn run(&self) -> Result<Self::Output, Self::Error>;
}

/// Shared, type-erased unit handle as stored by batches
pub type SharedUnit<T, E> = Arc<dyn WorkUnit<Output = T, Error = E>>;

/// Adapter turning a closure into a [`WorkUnit`]
pub struct FnUnit<F> {
    f: F,
}

/// Wrap a closure returning a future as a work unit
///
/// # Example
/// ```text
/// let unit = unit_fn(|| async { upload_part(7).await });
/// ```
pub fn unit_fn<F, Fut, T, E>(f: F) -> FnUnit<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    FnUnit { f }
}

/// Wrap a closure as a shared unit ready to be handed to a batch
pub fn shared_fn<F, Fut, T, E>(f: F) -> SharedUnit<T, E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    Arc::new(unit_fn(f))
}

#[async_trait]
impl<F, Fut, T, E> WorkUnit for FnUnit<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    type Output = T;
    type Error = E;

    async fn run(&self) -> Result<T, E> {
        (self.f)().await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Mock unit behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Fail the first N invocations, then succeed
        FailTimes(usize),
        /// Always fail with message
        AlwaysFail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Tracks how many mock units are running at once
    #[derive(Clone, Default)]
    pub struct ConcurrencyProbe {
        inner: Arc<ProbeCounters>,
    }

    #[derive(Default)]
    struct ProbeCounters {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ConcurrencyProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn current(&self) -> usize {
            self.inner.current.load(Ordering::SeqCst)
        }

        pub fn peak(&self) -> usize {
            self.inner.peak.load(Ordering::SeqCst)
        }

        fn enter(&self) -> ProbeGuard {
            let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.inner.peak.fetch_max(now, Ordering::SeqCst);
            ProbeGuard {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    struct ProbeGuard {
        inner: Arc<ProbeCounters>,
    }

    impl Drop for ProbeGuard {
        fn drop(&mut self) {
            self.inner.current.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Ordered record of unit invocations, by unit name
    #[derive(Clone, Default)]
    pub struct Journal {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl Journal {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record(&self, entry: impl Into<String>) {
            self.entries.lock().unwrap().push(entry.into());
        }

        pub fn entries(&self) -> Vec<String> {
            self.entries.lock().unwrap().clone()
        }

        pub fn count(&self, entry: &str) -> usize {
            self.entries.lock().unwrap().iter().filter(|e| *e == entry).count()
        }
    }

    /// Mock work unit for testing
    ///
    /// Output is the unit's name; errors are plain strings.
    pub struct MockWorkUnit {
        name: String,
        behavior: MockBehavior,
        call_count: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        probe: Option<ConcurrencyProbe>,
        journal: Option<Journal>,
        delay: Option<Duration>,
    }

    impl MockWorkUnit {
        pub fn new(name: impl Into<String>, behavior: MockBehavior) -> Self {
            Self {
                name: name.into(),
                behavior,
                call_count: AtomicUsize::new(0),
                gate: None,
                probe: None,
                journal: None,
                delay: None,
            }
        }

        pub fn new_success(name: impl Into<String>) -> Self {
            Self::new(name, MockBehavior::Success)
        }

        pub fn new_flaky(name: impl Into<String>, failures: usize) -> Self {
            Self::new(name, MockBehavior::FailTimes(failures))
        }

        pub fn new_fail(name: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(name, MockBehavior::AlwaysFail(message.into()))
        }

        pub fn new_panic_inducing(name: impl Into<String>, message: impl Into<String>) -> Self {
            Self::new(name, MockBehavior::Panic(message.into()))
        }

        /// Each invocation blocks until one permit is added to `gate`
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }

        pub fn with_probe(mut self, probe: ConcurrencyProbe) -> Self {
            self.probe = Some(probe);
            self
        }

        pub fn with_journal(mut self, journal: Journal) -> Self {
            self.journal = Some(journal);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WorkUnit for MockWorkUnit {
        type Output = String;
        type Error = String;

        async fn run(&self) -> Result<String, String> {
            let attempt = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(journal) = &self.journal {
                journal.record(self.name.clone());
            }
            let _running = self.probe.as_ref().map(ConcurrencyProbe::enter);

            if let Some(gate) = &self.gate {
                match gate.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => return Err(format!("{}: gate closed", self.name)),
                }
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            match &self.behavior {
                MockBehavior::Success => Ok(self.name.clone()),
                MockBehavior::FailTimes(n) if attempt <= *n => {
                    Err(format!("{} failed on attempt {}", self.name, attempt))
                }
                MockBehavior::FailTimes(_) => Ok(self.name.clone()),
                MockBehavior::AlwaysFail(msg) => Err(format!("{}: {}", self.name, msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}
