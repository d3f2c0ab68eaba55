// Task Runner - Bounded admission control for asynchronous units of work

mod admission;
pub mod cancel;
pub mod constants;
mod panic_guard;

pub use admission::{Admission, UnitError};
pub use cancel::{cancel_channel, CancelToken, CancelTrigger};
pub use panic_guard::{catch_unit_panic, panic_message};

use crate::domain::{DomainError, Placement, WaitQueue};
use crate::error::{AppError, Result};
use constants::DEFAULT_MAX_CONCURRENCY;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Pool capacity: units allowed in flight at once
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl RunnerConfig {
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency }
    }

    pub fn validate(&self) -> std::result::Result<(), DomainError> {
        if self.max_concurrency == 0 {
            return Err(DomainError::InvalidConcurrency(self.max_concurrency));
        }
        Ok(())
    }
}

/// Per-submission options
#[derive(Clone, Default)]
pub struct SubmitOptions {
    pub placement: Placement,
    /// Checked right before invocation; a cancelled unit is never started
    pub cancel: Option<CancelToken>,
}

impl SubmitOptions {
    pub fn placement(placement: Placement) -> Self {
        Self {
            placement,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runner counters (for monitoring and tests)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub max_concurrency: usize,
    pub in_flight: usize,
    pub queued: usize,
    pub admitted_total: u64,
    pub settled_total: u64,
    pub peak_in_flight: usize,
}

/// Bounded task runner.
///
/// One Pool and one Wait Queue shared by every clone of the handle, so
/// unrelated callers compete for the same capacity. Construct one per
/// process (or per isolated subsystem) and pass clones around.
#[derive(Clone)]
pub struct TaskRunner {
    shared: Arc<Shared>,
}

struct Shared {
    max_concurrency: usize,
    runtime: Handle,
    next_ticket: AtomicU64,
    state: Mutex<PoolState>,
}

struct PoolState {
    in_flight: usize,
    queue: WaitQueue<QueuedJob>,
    /// A frame is launching claimed jobs; freed slots are left to it
    promoting: bool,
    admitted_total: u64,
    settled_total: u64,
    peak_in_flight: usize,
}

impl PoolState {
    fn occupy(&mut self) {
        self.in_flight += 1;
        self.admitted_total += 1;
        self.peak_in_flight = self.peak_in_flight.max(self.in_flight);
    }

    /// Pop the next queued job into a free slot, if there is one
    fn take_next(&mut self, max_concurrency: usize) -> Option<QueuedJob> {
        if self.in_flight >= max_concurrency {
            return None;
        }
        let next = self.queue.pop();
        if next.is_some() {
            self.occupy();
        }
        next
    }
}

/// A submission whose unit has not been invoked yet.
///
/// `start` builds the job future around the slot it is given; nothing runs
/// before that.
struct QueuedJob {
    ticket: u64,
    start: Box<dyn FnOnce(SlotGuard) -> BoxFuture<'static, ()> + Send>,
}

/// Holds one Pool slot.
///
/// A finishing job gives the slot back with `vacate` before reporting its
/// outcome. If the job future is dropped instead (task abort, runtime
/// shutdown) the drop gives it back, so a slot can never leak.
struct SlotGuard {
    shared: Arc<Shared>,
    ticket: u64,
    vacated: bool,
}

impl SlotGuard {
    /// Free the slot, claiming the queued job that takes it over
    fn vacate(&mut self) -> Option<QueuedJob> {
        self.vacated = true;
        self.shared.vacate(self.ticket)
    }

    fn promote(&self, next: Option<QueuedJob>) {
        self.shared.promote(next);
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if !self.vacated {
            let next = self.shared.vacate(self.ticket);
            self.shared.promote(next);
        }
    }
}

impl TaskRunner {
    /// Create a runner bound to the current tokio runtime
    ///
    /// # Errors
    /// - `AppError::Domain` if `max_concurrency` is 0
    /// - `AppError::Config` if called outside a tokio runtime
    pub fn new(config: RunnerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|e| {
            AppError::Config(format!("task runner must be created inside a tokio runtime: {}", e))
        })?;

        info!(
            max_concurrency = config.max_concurrency,
            "Task runner created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                max_concurrency: config.max_concurrency,
                runtime,
                next_ticket: AtomicU64::new(1),
                state: Mutex::new(PoolState {
                    in_flight: 0,
                    queue: WaitQueue::new(),
                    promoting: false,
                    admitted_total: 0,
                    settled_total: 0,
                    peak_in_flight: 0,
                }),
            }),
        })
    }

    /// Runner with the default capacity of 5
    pub fn with_default_concurrency() -> Result<Self> {
        Self::new(RunnerConfig::default())
    }

    pub fn max_concurrency(&self) -> usize {
        self.shared.max_concurrency
    }

    /// Submit a unit of work.
    ///
    /// Admits immediately when a slot is free, otherwise queues it per
    /// `placement`. Never waits; await the returned [`Admission`] for the
    /// unit's outcome.
    pub fn submit<F, Fut, T, E>(&self, unit: F, placement: Placement) -> Admission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_with(unit, SubmitOptions::placement(placement))
    }

    /// Submit a unit of work with a cancellation token
    pub fn submit_with<F, Fut, T, E>(&self, unit: F, options: SubmitOptions) -> Admission<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (job, admission) = self.prepare(unit, options.cancel);
        self.shared.admit_or_enqueue(vec![job], options.placement);
        admission
    }

    /// Submit several units sharing one placement.
    ///
    /// The group keeps its own order, also with `Front`: its first unit is
    /// admitted first and the whole group waits ahead of everything already
    /// queued. Admissions come back in submission order.
    pub fn submit_group_with<F, Fut, T, E>(
        &self,
        units: Vec<F>,
        options: SubmitOptions,
    ) -> Vec<Admission<T, E>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (jobs, admissions): (Vec<_>, Vec<_>) = units
            .into_iter()
            .map(|unit| self.prepare(unit, options.cancel.clone()))
            .unzip();
        self.shared.admit_or_enqueue(jobs, options.placement);
        admissions
    }

    pub fn stats(&self) -> RunnerStats {
        let state = self.shared.lock();
        RunnerStats {
            max_concurrency: self.shared.max_concurrency,
            in_flight: state.in_flight,
            queued: state.queue.len(),
            admitted_total: state.admitted_total,
            settled_total: state.settled_total,
            peak_in_flight: state.peak_in_flight,
        }
    }

    fn prepare<F, Fut, T, E>(
        &self,
        unit: F,
        cancel: Option<CancelToken>,
    ) -> (QueuedJob, Admission<T, E>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let start = move |mut slot: SlotGuard| {
            async move {
                let outcome = if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                    debug!(ticket, "Unit cancelled before invocation");
                    Err(UnitError::Cancelled)
                } else {
                    match catch_unit_panic(ticket, async move { unit().await }).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(e)) => Err(UnitError::Failed(e)),
                        Err(panic_msg) => Err(UnitError::Panicked(panic_msg)),
                    }
                };

                // Leave the Pool, report, then hand the slot on
                let next = slot.vacate();
                // The caller may have dropped its Admission; the outcome is then discarded
                let _ = tx.send(outcome);
                slot.promote(next);
            }
            .boxed()
        };

        let job = QueuedJob {
            ticket,
            start: Box::new(start),
        };
        (job, Admission::new(ticket, rx))
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // State is only mutated by short non-panicking sections
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit from the front of `jobs` while slots are free, queue the rest
    /// as one group
    fn admit_or_enqueue(self: &Arc<Self>, jobs: Vec<QueuedJob>, placement: Placement) {
        let mut admitted = Vec::new();
        {
            let mut state = self.lock();
            let mut jobs = jobs.into_iter();

            // A free slot next to a non-empty queue belongs to the promoting frame
            while state.in_flight < self.max_concurrency && state.queue.is_empty() {
                let Some(job) = jobs.next() else {
                    break;
                };
                state.occupy();
                debug!(
                    ticket = job.ticket,
                    in_flight = state.in_flight,
                    "Unit admitted"
                );
                admitted.push(job);
            }

            let waiting: Vec<QueuedJob> = jobs.collect();
            if !waiting.is_empty() {
                let count = waiting.len();
                state.queue.extend(waiting, placement);
                debug!(
                    count,
                    placement = %placement,
                    queued = state.queue.len(),
                    "Pool full, unit(s) queued"
                );
            }
        }

        for job in admitted {
            self.launch(job);
        }
    }

    /// Start an admitted job. The slot must already be counted.
    fn launch(self: &Arc<Self>, job: QueuedJob) {
        let slot = SlotGuard {
            shared: Arc::clone(self),
            ticket: job.ticket,
            vacated: false,
        };
        self.runtime.spawn((job.start)(slot));
    }

    /// Free a slot and, in the same critical section, claim it for the next
    /// queued job so no other admission can take it.
    fn vacate(&self, ticket: u64) -> Option<QueuedJob> {
        let mut state = self.lock();
        state.in_flight -= 1;
        state.settled_total += 1;
        debug!(
            ticket,
            in_flight = state.in_flight,
            queued = state.queue.len(),
            "Unit settled, slot released"
        );

        if state.promoting {
            return None;
        }
        let next = state.take_next(self.max_concurrency);
        state.promoting = next.is_some();
        next
    }

    /// Launch claimed jobs until the queue is empty or the Pool is full.
    ///
    /// A launch on a closing runtime drops its job on the spot, which frees
    /// the slot again from inside `launch`; that slot is picked up by this
    /// loop rather than by a nested promotion.
    fn promote(self: &Arc<Self>, mut next: Option<QueuedJob>) {
        while let Some(job) = next {
            debug!(ticket = job.ticket, "Promoting queued unit");
            self.launch(job);

            let mut state = self.lock();
            next = state.take_next(self.max_concurrency);
            state.promoting = next.is_some();
        }
    }
}
