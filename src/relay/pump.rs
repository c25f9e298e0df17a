//! Directional pump: copies lines from one channel to another.
//!
//! A pump runs until its source reaches EOF, its sink fails, it sees the
//! client's `quit` sentinel, or it is cancelled. Whatever the reason, on the
//! way out it marks itself stopped and cancels its peer if the peer is still
//! running, so the other direction never stays blocked on a dead session.

use crate::control::{NodeControl, StopReason};
use crate::runtime::{Canceller, LineSink, LineSource, ReadOutcome, MAX_LINE_LEN};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A client line starting with these bytes ends the session instead of
/// being forwarded.
pub const QUIT_SENTINEL: &[u8] = b"quit";

/// Which way a pump moves lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client socket to engine input.
    ClientToEngine,
    /// Engine output to client socket.
    EngineToClient,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientToEngine => "client -> engine",
            Self::EngineToClient => "engine -> client",
        }
    }

    /// Name given to the pump's thread.
    pub const fn thread_name(self) -> &'static str {
        match self {
            Self::ClientToEngine => "pump-client-engine",
            Self::EngineToClient => "pump-engine-client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a pump ended.
#[derive(Debug)]
pub enum PumpExit {
    /// The source closed.
    Eof,
    /// The client sent the quit sentinel.
    Quit,
    /// The pump was cancelled while waiting for input.
    Cancelled,
    /// Reading the source failed.
    ReadFailed(io::Error),
    /// Writing the sink failed.
    WriteFailed(io::Error),
    /// The pump thread could not be started or did not finish normally.
    Aborted,
}

impl PumpExit {
    /// Node-wide consequence of a pump ending this way, if any.
    ///
    /// Only the engine going away stops the node. A client hanging up, in
    /// any way, only ends its session.
    pub fn escalation(&self, direction: Direction) -> Option<StopReason> {
        match (direction, self) {
            (Direction::EngineToClient, PumpExit::Eof | PumpExit::ReadFailed(_)) => {
                Some(StopReason::EngineExited)
            }
            (Direction::ClientToEngine, PumpExit::WriteFailed(e))
                if e.kind() == io::ErrorKind::BrokenPipe =>
            {
                Some(StopReason::EngineClosed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Eof => f.write_str("eof"),
            PumpExit::Quit => f.write_str("quit"),
            PumpExit::Cancelled => f.write_str("cancelled"),
            PumpExit::ReadFailed(e) => write!(f, "read failed: {e}"),
            PumpExit::WriteFailed(e) => write!(f, "write failed: {e}"),
            PumpExit::Aborted => f.write_str("aborted"),
        }
    }
}

/// Liveness flag and cancellation handle of one pump, shared with its peer
/// and with the node.
#[derive(Debug)]
pub struct PumpControl {
    running: AtomicBool,
    canceller: Arc<Canceller>,
}

impl PumpControl {
    /// Control for a pump reading from the source `canceller` belongs to.
    pub fn new(canceller: Arc<Canceller>) -> Self {
        Self {
            running: AtomicBool::new(false),
            canceller,
        }
    }

    pub fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Interrupt the pump if it is still running; a no-op otherwise.
    ///
    /// The pump may exit between the check and the wake-up. That is fine:
    /// the canceller is re-armed before its source is read again.
    pub fn cancel(&self) {
        if self.is_running() {
            self.canceller.cancel();
        }
    }
}

/// One direction of a session.
pub struct Pump<'a, R, W> {
    direction: Direction,
    source: &'a mut R,
    sink: &'a mut W,
    control: &'a PumpControl,
    peer: &'a PumpControl,
    node: &'a NodeControl,
    trace: bool,
}

impl<'a, R: LineSource, W: LineSink> Pump<'a, R, W> {
    pub fn new(
        direction: Direction,
        source: &'a mut R,
        sink: &'a mut W,
        control: &'a PumpControl,
        peer: &'a PumpControl,
        node: &'a NodeControl,
    ) -> Self {
        Self {
            direction,
            source,
            sink,
            control,
            peer,
            node,
            trace: false,
        }
    }

    /// Log every forwarded line.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Relay until a terminal condition, then release the peer.
    pub fn run(mut self) -> PumpExit {
        self.control.mark_running();
        info!(direction = %self.direction, "Pump started");

        let exit = self.relay();

        match &exit {
            PumpExit::Cancelled => debug!(direction = %self.direction, "Pump cancelled"),
            PumpExit::ReadFailed(_) | PumpExit::WriteFailed(_) => {
                warn!(direction = %self.direction, %exit, "Pump failed")
            }
            _ => {}
        }

        if let Some(reason) = exit.escalation(self.direction) {
            self.node.stop(reason);
        }

        self.control.mark_stopped();
        if self.peer.is_running() {
            debug!(direction = %self.direction, "Cancelling peer pump");
            self.peer.cancel();
        }

        info!(direction = %self.direction, %exit, "Pump stopped");
        exit
    }

    fn relay(&mut self) -> PumpExit {
        let mut line = Vec::with_capacity(MAX_LINE_LEN);

        loop {
            match self.source.read_line(&mut line) {
                Ok(ReadOutcome::Line(_)) => {}
                Ok(ReadOutcome::Eof) => return PumpExit::Eof,
                Ok(ReadOutcome::Cancelled) => return PumpExit::Cancelled,
                Err(e) => return PumpExit::ReadFailed(e),
            }

            if self.trace {
                info!(
                    direction = %self.direction,
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "Relaying line"
                );
            }

            if self.direction == Direction::ClientToEngine && line.starts_with(QUIT_SENTINEL) {
                return PumpExit::Quit;
            }

            if let Err(e) = self.sink.write_line(&line) {
                return PumpExit::WriteFailed(e);
            }
        }
    }
}
