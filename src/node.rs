//! Node loop: handshake, accept, relay, repeat.
//!
//! ```text
//!   AwaitingHandshake --ok--> AwaitingClient --accept--> InSession
//!          ^                        |                        |
//!          +-------- node running --+------------------------+
//!                                   |
//!          failure / node stopped   v
//!                              Terminated
//! ```
//!
//! Exactly one session exists at a time, and the engine is always reset
//! by a fresh handshake before the next client is accepted.

use crate::control::NodeControl;
use crate::engine::{self, EngineChannels, HandshakeError};
use crate::relay::Session;
use crate::runtime::{AcceptOutcome, Acceptor};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Current position in the node's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    /// Resetting the engine for the next client.
    AwaitingHandshake,
    /// Engine is ready; waiting for a client to connect.
    AwaitingClient,
    /// Relaying one client.
    InSession,
    /// No further clients will be served.
    Terminated,
}

/// Failures that end the node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Engine handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Failed to accept client: {0}")]
    Accept(#[source] io::Error),
}

/// Serves one client at a time from a single engine.
pub struct Node {
    acceptor: Acceptor,
    engine: EngineChannels,
    control: Arc<NodeControl>,
    trace: bool,
    phase: NodePhase,
    /// Client accepted in `AwaitingClient`, consumed by `InSession`.
    client: Option<(TcpStream, SocketAddr)>,
    sessions: u64,
}

impl Node {
    pub fn new(acceptor: Acceptor, engine: EngineChannels, control: Arc<NodeControl>) -> Self {
        Self {
            acceptor,
            engine,
            control,
            trace: false,
            phase: NodePhase::AwaitingHandshake,
            client: None,
            sessions: 0,
        }
    }

    /// Log every relayed line.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Run until the node terminates, then shut the engine down.
    ///
    /// Returns an error only for handshake or accept failures. A stop
    /// requested by a signal or caused by the engine exiting is a normal
    /// end.
    pub fn run(mut self) -> Result<(), NodeError> {
        let control = Arc::clone(&self.control);
        let _accept_watch = control.watch(self.acceptor.canceller());
        let _engine_watch = control.watch(self.engine.output.canceller());

        let mut result = Ok(());
        while self.phase != NodePhase::Terminated {
            match self.step() {
                Ok(next) => self.phase = next,
                Err(e) => {
                    error!(error = %e, phase = ?self.phase, "Node failed");
                    result = Err(e);
                    self.phase = NodePhase::Terminated;
                }
            }
        }

        self.terminate();
        result
    }

    /// Perform the work of the current phase and return the next one.
    fn step(&mut self) -> Result<NodePhase, NodeError> {
        match self.phase {
            NodePhase::AwaitingHandshake => {
                if !self.control.is_running() {
                    return Ok(NodePhase::Terminated);
                }
                self.control.arm(&self.engine.output.canceller());
                match engine::handshake(&mut self.engine.input, &mut self.engine.output) {
                    Ok(()) => Ok(NodePhase::AwaitingClient),
                    // Interrupted by a stop, not a failure of the engine
                    Err(HandshakeError::Cancelled) if !self.control.is_running() => {
                        Ok(NodePhase::Terminated)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            NodePhase::AwaitingClient => match self.acceptor.accept().map_err(NodeError::Accept)? {
                AcceptOutcome::Accepted(stream, peer) => {
                    info!(%peer, "Accepted client");
                    self.client = Some((stream, peer));
                    Ok(NodePhase::InSession)
                }
                AcceptOutcome::Cancelled => Ok(NodePhase::Terminated),
            },
            NodePhase::InSession => {
                if let Some((stream, peer)) = self.client.take() {
                    self.sessions += 1;
                    let session = Session::new(stream, peer, &mut self.engine, &self.control)
                        .with_trace(self.trace);
                    if let Err(e) = session.run() {
                        warn!(%peer, error = %e, "Failed to start session");
                    }
                }
                if self.control.is_running() {
                    Ok(NodePhase::AwaitingHandshake)
                } else {
                    Ok(NodePhase::Terminated)
                }
            }
            NodePhase::Terminated => Ok(NodePhase::Terminated),
        }
    }

    fn terminate(self) {
        match self.control.stop_reason() {
            Some(reason) if reason.is_signal() => warn!(%reason, "Node terminated"),
            Some(reason) => info!(%reason, "Node terminated"),
            None => info!("Node terminated"),
        }
        info!(sessions = self.sessions, "Sessions served");

        let Node {
            acceptor,
            mut engine,
            ..
        } = self;
        engine::shutdown(&mut engine.input);
        drop(acceptor);
        engine.close();
    }
}
