// Pre-invocation cancellation token

use tokio::sync::watch;

/// Checked by the runner right before a queued unit is invoked
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Cancellation trigger, owned by whoever decides to give up on the work
pub struct CancelTrigger {
    tx: watch::Sender<bool>,
}

impl CancelTrigger {
    /// Cancel every unit holding a token of this channel that has not started yet
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a cancellation channel
pub fn cancel_channel() -> (CancelTrigger, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelTrigger { tx }, CancelToken { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_every_token() {
        let (trigger, token) = cancel_channel();
        let other = token.clone();
        assert!(!token.is_cancelled());

        trigger.cancel();
        assert!(token.is_cancelled());
        assert!(other.is_cancelled());
        assert!(trigger.is_cancelled());
    }

    #[test]
    fn test_cancel_without_tokens_is_recorded() {
        let (trigger, token) = cancel_channel();
        drop(token);

        trigger.cancel();
        assert!(trigger.is_cancelled());
    }
}
