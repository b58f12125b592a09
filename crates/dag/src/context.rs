//! Cancellation context and completion signals
//!
//! Every stage of the pipeline receives a [`Context`]. Cancelling it stops
//! the walk scheduler from dispatching new work and unblocks every pending
//! wait with [`Error::Cancelled`].

use crate::error::{Error, Result};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How often blocked waits re-check for cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative cancellation handle passed through every stage
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled together with this one, but cancellable on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Return `Error::Cancelled` once the context has been cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The underlying token, for async callers that want to `select!` on it
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Sleep for `duration` unless cancelled first
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let mut remaining = duration;
        while !remaining.is_zero() {
            self.check()?;
            let step = remaining.min(POLL_INTERVAL);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.check()
    }
}

/// One-shot completion signal for a walk worker
///
/// Finishing is idempotent: the first outcome wins.
#[derive(Debug, Default)]
pub struct Signal {
    outcome: Mutex<Option<bool>>,
    ready: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the worker outcome and wake every waiter
    pub fn finish(&self, ok: bool) {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        if outcome.is_none() {
            *outcome = Some(ok);
        }
        drop(outcome);
        self.ready.notify_all();
    }

    /// The recorded outcome, if the worker has finished
    pub fn outcome(&self) -> Option<bool> {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the worker finishes; `Ok(false)` means it failed
    pub fn wait(&self, ctx: &Context) -> Result<bool> {
        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(ok) = *outcome {
                return Ok(ok);
            }
            ctx.check()?;
            let (guard, _) = self
                .ready
                .wait_timeout(outcome, POLL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            outcome = guard;
        }
    }
}
