//! Engine reset handshake.
//!
//! Before each client the engine is asked to identify itself (`uci`) and,
//! once it acknowledges (`uciok`), is reset to a fresh game at the starting
//! position. Anything the engine prints before the acknowledgment, including
//! leftovers from the previous client, is read and discarded.

use crate::runtime::{LineSink, LineSource, ReadOutcome, MAX_LINE_LEN};
use std::io;
use thiserror::Error;
use tracing::{debug, info};

/// Capability query sent to start the handshake.
pub const CAPABILITY_QUERY: &[u8] = b"uci\n";
/// Prefix of the line that acknowledges the query (case-sensitive).
pub const ACKNOWLEDGMENT: &[u8] = b"uciok";
/// First reset command: forget the previous client's game.
pub const NEW_GAME: &[u8] = b"ucinewgame\n";
/// Second reset command: back to the starting position.
pub const DEFAULT_POSITION: &[u8] = b"position startpos\n";
/// Sent once when the node terminates.
pub const SHUTDOWN: &[u8] = b"quit\n";

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("engine output closed before acknowledging")]
    Eof,
    #[error("handshake cancelled")]
    Cancelled,
    #[error("failed to send {command:?} to engine: {source}")]
    Send {
        command: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to read engine output: {0}")]
    Receive(#[source] io::Error),
}

/// Run the reset handshake against the engine.
///
/// `input` carries commands to the engine, `output` its responses. On
/// success exactly `uci`, `ucinewgame` and `position startpos` have been
/// sent, in that order; on failure the reset commands are never sent.
pub fn handshake<W, R>(input: &mut W, output: &mut R) -> Result<(), HandshakeError>
where
    W: LineSink,
    R: LineSource,
{
    send(input, CAPABILITY_QUERY)?;

    let mut line = Vec::with_capacity(MAX_LINE_LEN);
    loop {
        match output.read_line(&mut line).map_err(HandshakeError::Receive)? {
            ReadOutcome::Line(_) if line.starts_with(ACKNOWLEDGMENT) => break,
            ReadOutcome::Line(_) => {
                debug!(line = %String::from_utf8_lossy(&line).trim_end(), "Skipping engine line");
            }
            ReadOutcome::Eof => return Err(HandshakeError::Eof),
            ReadOutcome::Cancelled => return Err(HandshakeError::Cancelled),
        }
    }

    send(input, NEW_GAME)?;
    send(input, DEFAULT_POSITION)?;

    info!("Engine handshake complete");
    Ok(())
}

/// Ask the engine to exit. Failures are logged and otherwise ignored.
pub fn shutdown<W: LineSink>(input: &mut W) {
    match input.write_line(SHUTDOWN) {
        Ok(()) => info!("Sent quit to engine"),
        Err(e) => debug!(error = %e, "Failed to send quit to engine"),
    }
}

fn send<W: LineSink>(input: &mut W, command: &'static [u8]) -> Result<(), HandshakeError> {
    input
        .write_line(command)
        .map_err(|source| HandshakeError::Send {
            command: command_name(command),
            source,
        })
}

fn command_name(command: &'static [u8]) -> &'static str {
    std::str::from_utf8(command).unwrap_or("?").trim_end()
}
