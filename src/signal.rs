//! Termination signals.
//!
//! SIGINT, SIGTERM and SIGHUP are turned into a node stop on a dedicated
//! thread. If an interrupt or terminate arrives while the node is already
//! stopping, the process exits at once.

use crate::control::{NodeControl, StopReason};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use std::io;
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::warn;

/// Exit status used when shutdown is forced by a repeated signal.
pub const FORCED_EXIT_CODE: i32 = 130;

const HANDLED: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Background thread delivering signals to the node.
pub struct SignalWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

/// Start delivering termination signals to `control`.
pub fn install(control: Arc<NodeControl>) -> io::Result<SignalWatcher> {
    let mut signals = Signals::new(HANDLED)?;
    let handle = signals.handle();

    let thread = thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                if deliver(&control, signal) == Delivery::ForceExit {
                    warn!(signal, "Forced exit while stopping");
                    process::exit(FORCED_EXIT_CODE);
                }
            }
        })?;

    Ok(SignalWatcher {
        handle,
        thread: Some(thread),
    })
}

impl SignalWatcher {
    /// Stop listening for signals and join the thread.
    pub fn close(mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Signal thread panicked");
            }
        }
    }
}

/// What a received signal did to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// First stop request; the node is now stopping.
    Stopped,
    /// Not a termination signal, or a repeated hangup.
    Ignored,
    /// Repeated interrupt or terminate while already stopping.
    ForceExit,
}

/// Record the stop for `signal`. The node logs the transition itself.
fn deliver(control: &NodeControl, signal: i32) -> Delivery {
    let Some(reason) = reason_for(signal) else {
        return Delivery::Ignored;
    };
    if control.stop(reason) {
        Delivery::Stopped
    } else if signal == SIGHUP {
        Delivery::Ignored
    } else {
        Delivery::ForceExit
    }
}

fn reason_for(signal: i32) -> Option<StopReason> {
    match signal {
        SIGINT => Some(StopReason::Interrupted),
        SIGTERM => Some(StopReason::Terminated),
        SIGHUP => Some(StopReason::HangUp),
        _ => None,
    }
}
