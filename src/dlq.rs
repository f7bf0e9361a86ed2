use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

use crate::domain::{DeadLetterQueue, Error};

/// Logs rejected commands to stderr and counts them.
#[derive(Default, Debug)]
pub struct StdErrDLQ {
    reported: AtomicUsize,
}

impl StdErrDLQ {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reported(&self) -> usize {
        self.reported.load(Ordering::Relaxed)
    }
}

impl DeadLetterQueue for StdErrDLQ {
    fn report(&self, error: &Error) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        warn!(error = %error, retryable = error.is_retryable(), "dead letter");
    }
}
