// Admission handle returned by TaskRunner::submit

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a submitted unit did not produce a value
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnitError<E> {
    #[error("unit failed: {0}")]
    Failed(E),

    #[error("unit panicked: {0}")]
    Panicked(String),

    #[error("unit cancelled before it was invoked")]
    Cancelled,

    #[error("unit dropped by the runner before it settled")]
    Abandoned,
}

impl<E> UnitError<E> {
    /// Only an ordinary failure of the unit's own operation is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, UnitError::Failed(_))
    }
}

/// Eventual outcome of one submission.
///
/// Resolves once the unit settles; dropping it does not cancel the unit.
#[must_use = "an Admission does nothing unless awaited; the unit runs regardless"]
pub struct Admission<T, E> {
    ticket: u64,
    rx: oneshot::Receiver<Result<T, UnitError<E>>>,
}

impl<T, E> Admission<T, E> {
    pub(super) fn new(ticket: u64, rx: oneshot::Receiver<Result<T, UnitError<E>>>) -> Self {
        Self { ticket, rx }
    }

    /// Runner-local sequence number of this submission
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl<T, E> Future for Admission<T, E> {
    type Output = Result<T, UnitError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // Sender dropped: the queued job was discarded without running
            Poll::Ready(Err(_)) => Poll::Ready(Err(UnitError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
