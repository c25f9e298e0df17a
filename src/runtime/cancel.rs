//! Cancellation interrupt for blocked reads.
//!
//! A `Canceller` pairs a request flag with a `mio::Waker` registered on the
//! poller a blocked reader (or acceptor) is waiting on. Cancelling sets the
//! flag and wakes the poller; the waiter sees the flag and returns a
//! distinguished "cancelled, no data" outcome instead of data.

use mio::{Registry, Token, Waker};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Token reserved for the waker on every poller that owns a `Canceller`.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Payload-free, idempotent cancellation signal for one blocking waiter.
#[derive(Debug)]
pub struct Canceller {
    requested: AtomicBool,
    waker: Waker,
}

impl Canceller {
    /// Create a canceller whose waker is registered on `registry`.
    pub fn new(registry: &Registry) -> io::Result<Self> {
        Ok(Self {
            requested: AtomicBool::new(false),
            waker: Waker::new(registry, WAKE_TOKEN)?,
        })
    }

    /// Request cancellation and wake the waiter.
    ///
    /// Safe to call any number of times, including after the waiter has
    /// stopped waiting for good.
    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            debug!(error = %e, "Failed to wake cancelled waiter");
        }
    }

    /// Whether cancellation has been requested since the last `rearm`.
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the waiter can block again.
    ///
    /// A stale wake-up left on the poller is harmless: waiters re-check
    /// `is_cancelled` after every wake.
    pub fn rearm(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}
