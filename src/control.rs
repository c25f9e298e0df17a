//! Node-wide termination state.
//!
//! The node runs until a stop reason is recorded. Recording one also fans
//! the cancellation interrupt out to every waiter currently registered with
//! `watch`, so an idle node (blocked in accept, in a handshake read, or in
//! two quiet pumps) unwinds without needing any traffic.

use crate::runtime::Canceller;
use slab::Slab;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Why the node stopped accepting clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StopReason {
    /// SIGINT received (Ctrl+C).
    Interrupted = 1,
    /// SIGTERM received.
    Terminated = 2,
    /// SIGHUP received.
    HangUp = 3,
    /// The engine's output stream ended or failed during a session.
    EngineExited = 4,
    /// Writing to the engine's input failed with a broken pipe.
    EngineClosed = 5,
}

impl StopReason {
    /// Converts a stored code back to a reason. `0` means "still running".
    const fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Interrupted),
            2 => Some(Self::Terminated),
            3 => Some(Self::HangUp),
            4 => Some(Self::EngineExited),
            5 => Some(Self::EngineClosed),
            _ => None,
        }
    }

    /// Whether the stop was requested from outside rather than caused by the
    /// engine going away.
    pub const fn is_signal(self) -> bool {
        matches!(self, Self::Interrupted | Self::Terminated | Self::HangUp)
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted by SIGINT",
            Self::Terminated => "terminated by SIGTERM",
            Self::HangUp => "hangup by SIGHUP",
            Self::EngineExited => "engine output closed",
            Self::EngineClosed => "engine input closed (broken pipe)",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Shared stop flag plus the set of waiters to interrupt on stop.
#[derive(Debug, Default)]
pub struct NodeControl {
    reason: AtomicU8,
    targets: Mutex<Slab<Arc<Canceller>>>,
}

impl NodeControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no stop reason has been recorded yet.
    pub fn is_running(&self) -> bool {
        self.reason.load(Ordering::SeqCst) == 0
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        StopReason::from_u8(self.reason.load(Ordering::SeqCst))
    }

    /// Record `reason` and interrupt every watched waiter.
    ///
    /// Only the first reason is kept. Returns `true` if this call is the one
    /// that stopped the node.
    pub fn stop(&self, reason: StopReason) -> bool {
        let first = self
            .reason
            .compare_exchange(0, reason as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            info!(%reason, "Node stopping");
        } else {
            debug!(%reason, "Node already stopping");
        }

        for (_, canceller) in self.targets().iter() {
            canceller.cancel();
        }
        first
    }

    /// Interrupt `canceller` on stop for as long as the returned guard lives.
    ///
    /// If the node is already stopped the canceller fires immediately.
    pub fn watch(&self, canceller: Arc<Canceller>) -> Watch<'_> {
        let mut targets = self.targets();
        if !self.is_running() {
            canceller.cancel();
        }
        let key = targets.insert(canceller);
        Watch { control: self, key }
    }

    /// Clear a previous cancellation on `canceller` unless the node is
    /// stopping, in which case it stays (or becomes) cancelled.
    pub fn arm(&self, canceller: &Canceller) {
        canceller.rearm();
        if !self.is_running() {
            canceller.cancel();
        }
    }

    /// Number of waiters currently watched.
    #[cfg(test)]
    pub fn watched(&self) -> usize {
        self.targets().len()
    }

    fn targets(&self) -> MutexGuard<'_, Slab<Arc<Canceller>>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration returned by `NodeControl::watch`; unregisters on drop.
#[must_use = "the waiter is unwatched as soon as the guard is dropped"]
pub struct Watch<'a> {
    control: &'a NodeControl,
    key: usize,
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        self.control.targets().try_remove(self.key);
    }
}
