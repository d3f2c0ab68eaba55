// Panic isolation for admitted units
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

/// Drive a unit future, turning a panic into `Err(message)`.
///
/// A panicking unit must not take the runner task down with it: the slot
/// release and queue promotion still have to happen afterwards.
pub async fn catch_unit_panic<F>(ticket: u64, future: F) -> Result<F::Output, String>
where
    F: Future,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let panic_msg = panic_message(payload.as_ref());
            error!(ticket, panic_msg = %panic_msg, "Unit panicked");
            Err(panic_msg)
        }
    }
}

/// Extract a readable message from a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
