//! Batch Coordinator - drives a collection of units through a shared runner
//!
//! A batch admits at most `max_concurrency` of its own units at a time,
//! keeps the rest in its wait list, tops admission back up as units
//! settle, retries failures at the head of the runner queue within a
//! bounded budget, and settles one aggregate outcome once nothing is active
//! or waiting:
//! - `Fulfilled` when no unit exhausted its retries
//! - `Rejected` as soon as one did (latched, the batch still drains)

pub mod options;

pub use options::{validate_options, BatchOptions, FailurePolicy};

use crate::application::retry::{RetryBudget, RetryDecision};
use crate::application::runner::{
    cancel_channel, CancelToken, CancelTrigger, SubmitOptions, TaskRunner, UnitError,
};
use crate::domain::{
    BatchId, BatchReport, BatchSnapshot, BatchStatus, Placement, UnitFailure, UnitId, WaitQueue,
};
use crate::error::{AppError, Result};
use crate::port::{Clock, IdProvider, SharedUnit, SystemClock, UuidProvider};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Batch-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch {batch_id} rejected: {} unit(s) exhausted their retries", .failures.len())]
    Rejected {
        batch_id: BatchId,
        failures: Vec<UnitFailure>,
        report: BatchReport,
    },

    #[error("batch {batch_id} already settled as {status}")]
    Settled {
        batch_id: BatchId,
        status: BatchStatus,
    },

    #[error("batch {0} was dropped before it settled")]
    Disconnected(BatchId),
}

type BatchOutcome = std::result::Result<BatchReport, BatchError>;

/// Starts batches on a shared runner
pub struct BatchCoordinator {
    runner: TaskRunner,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdProvider>,
}

impl BatchCoordinator {
    pub fn new(runner: TaskRunner) -> Self {
        Self::with_providers(runner, Arc::new(SystemClock), Arc::new(UuidProvider))
    }

    /// Coordinator with injected clock and id source (deterministic tests)
    pub fn with_providers(
        runner: TaskRunner,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self { runner, clock, ids }
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Start a batch.
    ///
    /// Admits up to the runner's capacity right away, in submission order;
    /// the rest wait in the batch's own list. An empty batch settles as
    /// fulfilled immediately.
    ///
    /// # Errors
    /// - `AppError::Validation` for invalid options
    /// - `AppError::Config` if called outside a tokio runtime
    pub fn start<T, E>(
        &self,
        units: Vec<SharedUnit<T, E>>,
        options: BatchOptions,
    ) -> Result<BatchHandle<T, E>>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        validate_options(&options)?;
        let runtime = Handle::try_current().map_err(|e| {
            AppError::Config(format!("batch must be started inside a tokio runtime: {}", e))
        })?;

        let id = self.ids.generate_id();
        let (cancel, token) = cancel_channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        info!(
            batch_id = %id,
            label = options.label.as_deref().unwrap_or("-"),
            units = units.len(),
            max_concurrency = self.runner.max_concurrency(),
            retries = options.retries,
            retry_scope = ?options.retry_scope,
            on_failure = ?options.on_failure,
            "Batch started"
        );

        let inner = Arc::new(BatchInner {
            id,
            label: options.label.clone(),
            runner: self.runner.clone(),
            runtime,
            clock: Arc::clone(&self.clock),
            on_failure: options.on_failure,
            cancel,
            token,
            started_at: self.clock.now_millis(),
            outcome_tx,
            state: Mutex::new(BatchState {
                status: BatchStatus::Pending,
                settled: false,
                active: 0,
                wait_list: WaitQueue::new(),
                next_unit_id: 0,
                submitted: 0,
                succeeded: 0,
                failed: 0,
                abandoned: 0,
                budget: RetryBudget::new(options.retries, options.retry_scope),
                failures: Vec::new(),
            }),
        });

        {
            let mut state = inner.lock();
            inner.enqueue(&mut state, units, options.placement, Placement::Back);
            inner.top_up(&mut state);
            inner.settle_if_drained(&mut state);
        }

        Ok(BatchHandle { inner, outcome_rx })
    }
}

/// Handle to a running batch
pub struct BatchHandle<T, E> {
    inner: Arc<BatchInner<T, E>>,
    outcome_rx: watch::Receiver<Option<BatchOutcome>>,
}

impl<T, E> Clone for BatchHandle<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            outcome_rx: self.outcome_rx.clone(),
        }
    }
}

impl<T, E> BatchHandle<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    /// Add more units to a running batch.
    ///
    /// `Back` appends to the batch's wait list; `Front` puts the group ahead
    /// of every waiting unit and also jumps the runner queue. Returns the ids
    /// given to the new units.
    ///
    /// # Errors
    /// `BatchError::Settled` once the batch has settled.
    pub fn insert(
        &self,
        units: Vec<SharedUnit<T, E>>,
        placement: Placement,
    ) -> std::result::Result<Vec<UnitId>, BatchError> {
        let mut state = self.inner.lock();
        if state.settled {
            warn!(
                batch_id = %self.inner.id,
                status = %state.status,
                "Insert into settled batch refused"
            );
            return Err(BatchError::Settled {
                batch_id: self.inner.id.clone(),
                status: state.status,
            });
        }

        let ids = self.inner.enqueue(&mut state, units, placement, placement);
        debug!(
            batch_id = %self.inner.id,
            inserted = ids.len(),
            placement = %placement,
            "Units inserted"
        );
        self.inner.top_up(&mut state);
        Ok(ids)
    }

    /// Wait for the aggregate outcome.
    ///
    /// Every call, before or after settlement, observes the same outcome.
    pub async fn done(&self) -> std::result::Result<BatchReport, BatchError> {
        let mut rx = self.outcome_rx.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| BatchError::Disconnected(self.inner.id.clone()))?;
        match outcome.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(BatchError::Disconnected(self.inner.id.clone())),
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.inner.lock().status
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().settled
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let state = self.inner.lock();
        BatchSnapshot {
            batch_id: self.inner.id.clone(),
            label: self.inner.label.clone(),
            status: state.status,
            active: state.active,
            waiting: state.wait_list.len(),
            submitted: state.submitted,
            succeeded: state.succeeded,
            failed: state.failed,
            retries_used: state.budget.used(),
            abandoned: state.abandoned,
        }
    }
}

struct BatchInner<T, E> {
    id: BatchId,
    label: Option<String>,
    runner: TaskRunner,
    runtime: Handle,
    clock: Arc<dyn Clock>,
    on_failure: FailurePolicy,
    cancel: CancelTrigger,
    token: CancelToken,
    started_at: i64,
    outcome_tx: watch::Sender<Option<BatchOutcome>>,
    state: Mutex<BatchState<T, E>>,
}

struct BatchState<T, E> {
    status: BatchStatus,
    settled: bool,
    /// Units handed to the runner (running or in its queue)
    active: usize,
    wait_list: WaitQueue<PendingUnit<T, E>>,
    next_unit_id: UnitId,
    submitted: usize,
    succeeded: usize,
    failed: usize,
    abandoned: usize,
    budget: RetryBudget,
    failures: Vec<UnitFailure>,
}

struct PendingUnit<T, E> {
    id: UnitId,
    unit: SharedUnit<T, E>,
    /// Runner placement for this unit's next admission
    placement: Placement,
    attempts: u32,
    retries_left: u32,
}

impl<T, E> BatchInner<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    fn lock(&self) -> MutexGuard<'_, BatchState<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True once further queued work must not run
    fn is_halted(&self, state: &BatchState<T, E>) -> bool {
        state.status.is_rejected() && self.on_failure == FailurePolicy::CancelPending
    }

    /// Register units and put them on the wait list
    fn enqueue(
        &self,
        state: &mut BatchState<T, E>,
        units: Vec<SharedUnit<T, E>>,
        runner_placement: Placement,
        list_placement: Placement,
    ) -> Vec<UnitId> {
        let allowance = state.budget.unit_allowance();
        let mut ids = Vec::with_capacity(units.len());
        let mut group = Vec::with_capacity(units.len());
        for unit in units {
            let id = state.next_unit_id;
            state.next_unit_id += 1;
            ids.push(id);
            group.push(PendingUnit {
                id,
                unit,
                placement: runner_placement,
                attempts: 0,
                retries_left: allowance,
            });
        }
        state.submitted += group.len();

        if self.is_halted(state) {
            // Rejected under cancel-on-failure: accepted but never run
            state.abandoned += group.len();
            debug!(
                batch_id = %self.id,
                abandoned = group.len(),
                "Batch already rejected, new units abandoned"
            );
            return ids;
        }

        state.wait_list.extend(group, list_placement);
        ids
    }

    /// Admit waiting units until the batch holds `max_concurrency` of them.
    ///
    /// Consecutive units sharing a placement go to the runner as one group,
    /// so a front-inserted group keeps its order in the runner queue too.
    fn top_up(self: &Arc<Self>, state: &mut BatchState<T, E>) {
        if self.is_halted(state) {
            return;
        }
        let headroom = self.runner.max_concurrency().saturating_sub(state.active);
        let mut popped = Vec::with_capacity(headroom.min(state.wait_list.len()));
        while popped.len() < headroom {
            let Some(unit) = state.wait_list.pop() else {
                break;
            };
            popped.push(unit);
        }

        let mut popped = popped.into_iter().peekable();
        while let Some(first) = popped.next() {
            let placement = first.placement;
            let mut group = vec![first];
            while let Some(unit) = popped.next_if(|u| u.placement == placement) {
                group.push(unit);
            }
            self.admit(state, group, placement);
        }
    }

    /// Hand units to the runner and watch for their outcomes
    fn admit(
        self: &Arc<Self>,
        state: &mut BatchState<T, E>,
        mut group: Vec<PendingUnit<T, E>>,
        placement: Placement,
    ) {
        let mut jobs = Vec::with_capacity(group.len());
        for pending in group.iter_mut() {
            state.active += 1;
            pending.attempts += 1;
            debug!(
                batch_id = %self.id,
                unit_id = pending.id,
                attempt = pending.attempts,
                placement = %placement,
                active = state.active,
                "Admitting unit"
            );
            let unit = Arc::clone(&pending.unit);
            jobs.push(move || async move { unit.run().await });
        }

        let admissions = self.runner.submit_group_with(
            jobs,
            SubmitOptions::placement(placement).with_cancel(self.token.clone()),
        );

        for (pending, admission) in group.into_iter().zip(admissions) {
            let inner = Arc::clone(self);
            self.runtime.spawn(async move {
                let outcome = admission.await;
                inner.on_settled(pending, outcome);
            });
        }
    }

    /// Settlement handler for one admission of one unit
    fn on_settled(
        self: &Arc<Self>,
        mut pending: PendingUnit<T, E>,
        outcome: std::result::Result<T, UnitError<E>>,
    ) {
        let mut state = self.lock();
        state.active -= 1;

        match outcome {
            Ok(_) => {
                state.succeeded += 1;
                if self.is_halted(&state) {
                    debug!(
                        batch_id = %self.id,
                        unit_id = pending.id,
                        "Batch rejected, result discarded"
                    );
                } else {
                    debug!(batch_id = %self.id, unit_id = pending.id, "Unit succeeded");
                }
            }
            Err(UnitError::Cancelled) => {
                state.abandoned += 1;
                debug!(batch_id = %self.id, unit_id = pending.id, "Unit cancelled");
            }
            Err(err) => {
                let decision = if err.is_retryable() && !self.is_halted(&state) {
                    state.budget.should_retry(pending.id, &mut pending.retries_left)
                } else {
                    RetryDecision::Failed
                };

                match decision {
                    RetryDecision::Retry { remaining } => {
                        info!(
                            batch_id = %self.id,
                            unit_id = pending.id,
                            attempt = pending.attempts,
                            remaining,
                            error = %err,
                            "Retrying unit after failure"
                        );
                        self.admit(&mut state, vec![pending], Placement::Front);
                    }
                    RetryDecision::Failed => self.fail_unit(&mut state, &pending, err),
                }
            }
        }

        self.top_up(&mut state);
        self.settle_if_drained(&mut state);
    }

    fn fail_unit(
        &self,
        state: &mut BatchState<T, E>,
        pending: &PendingUnit<T, E>,
        err: UnitError<E>,
    ) {
        state.failed += 1;
        state.failures.push(UnitFailure {
            unit_id: pending.id,
            attempts: pending.attempts,
            reason: err.to_string(),
        });

        if !state.status.is_pending() {
            debug!(
                batch_id = %self.id,
                unit_id = pending.id,
                error = %err,
                "Unit failed in already rejected batch"
            );
            return;
        }

        if let Err(e) = state.status.reject() {
            warn!(batch_id = %self.id, error = %e, "Status transition refused");
            return;
        }
        warn!(
            batch_id = %self.id,
            unit_id = pending.id,
            attempts = pending.attempts,
            error = %err,
            "Unit exhausted retries, batch rejected"
        );

        if self.on_failure == FailurePolicy::CancelPending {
            self.cancel.cancel();
            let dropped = state.wait_list.drain().count();
            state.abandoned += dropped;
            if dropped > 0 {
                info!(
                    batch_id = %self.id,
                    abandoned = dropped,
                    "Waiting units abandoned"
                );
            }
        }
    }

    /// Settle exactly once, when nothing is active or waiting
    fn settle_if_drained(&self, state: &mut BatchState<T, E>) {
        if state.settled || state.active > 0 || !state.wait_list.is_empty() {
            return;
        }
        state.settled = true;

        if state.status.is_pending() {
            if let Err(e) = state.status.fulfill() {
                warn!(batch_id = %self.id, error = %e, "Status transition refused");
            }
        }

        let report = BatchReport {
            batch_id: self.id.clone(),
            label: self.label.clone(),
            submitted: state.submitted,
            succeeded: state.succeeded,
            retries_used: state.budget.used(),
            abandoned: state.abandoned,
            started_at: self.started_at,
            finished_at: self.clock.now_millis(),
        };

        let outcome = if state.status.is_rejected() {
            warn!(
                batch_id = %self.id,
                failed = state.failed,
                succeeded = state.succeeded,
                abandoned = state.abandoned,
                "Batch settled: rejected"
            );
            Err(BatchError::Rejected {
                batch_id: self.id.clone(),
                failures: state.failures.clone(),
                report,
            })
        } else {
            info!(
                batch_id = %self.id,
                succeeded = state.succeeded,
                retries_used = report.retries_used,
                duration_ms = report.duration_ms(),
                "Batch settled: fulfilled"
            );
            Ok(report)
        };

        self.outcome_tx.send_replace(Some(outcome));
    }
}
