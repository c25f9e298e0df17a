//! Engine endpoints.
//!
//! The engine is reachable only through two byte streams, normally named
//! FIFOs set up by whatever launched it:
//! - the input (request) endpoint, which the engine reads commands from and
//!   the node opens write-only
//! - the output (response) endpoint, which the engine writes to and the
//!   node opens read-only
//!
//! Both are opened once at startup and live until the node terminates;
//! every session borrows them.

pub mod handshake;

pub use handshake::{handshake, shutdown, HandshakeError};

use crate::config::OpenOrder;
use crate::runtime::{LineReader, LineWriter};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

/// Errors opening the engine endpoints.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to open engine input '{}': {}", .0.display(), .1)]
    OpenInput(PathBuf, #[source] io::Error),
    #[error("Failed to open engine output '{}': {}", .0.display(), .1)]
    OpenOutput(PathBuf, #[source] io::Error),
    #[error("Failed to set up engine output: {0}")]
    Setup(#[source] io::Error),
}

/// Line channels to and from the engine.
pub struct EngineChannels {
    /// Commands to the engine.
    pub input: LineWriter<File>,
    /// Responses from the engine.
    pub output: LineReader<File>,
}

impl EngineChannels {
    /// Open both endpoints in `order`.
    ///
    /// If the second open fails the first endpoint is closed again before
    /// the error is returned.
    pub fn open(input: &Path, output: &Path, order: OpenOrder) -> Result<Self, EngineError> {
        let (input, output) = match order {
            OpenOrder::InputFirst => {
                let input = open_input(input)?;
                (input, open_output(output)?)
            }
            OpenOrder::OutputFirst => {
                let output = open_output(output)?;
                (open_input(input)?, output)
            }
        };
        Self::from_files(input, output).map_err(EngineError::Setup)
    }

    /// Wrap already-open endpoints.
    pub fn from_files(input: File, output: File) -> io::Result<Self> {
        Ok(Self {
            input: LineWriter::new(input),
            output: LineReader::new(output)?,
        })
    }

    /// Release both endpoints.
    pub fn close(self) {
        info!("Closing engine endpoints");
        drop(self);
        info!("Closed engine endpoints");
    }
}

fn open_input(path: &Path) -> Result<File, EngineError> {
    info!(path = %path.display(), "Opening engine input");
    let file = OpenOptions::new().write(true).open(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to open engine input");
        EngineError::OpenInput(path.to_path_buf(), e)
    })?;
    info!(path = %path.display(), "Opened engine input");
    Ok(file)
}

fn open_output(path: &Path) -> Result<File, EngineError> {
    info!(path = %path.display(), "Opening engine output");
    let file = OpenOptions::new().read(true).open(path).map_err(|e| {
        error!(path = %path.display(), error = %e, "Failed to open engine output");
        EngineError::OpenOutput(path.to_path_buf(), e)
    })?;
    info!(path = %path.display(), "Opened engine output");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{LineSink, LineSource, ReadOutcome};
    use nix::sys::stat::Mode;
    use nix::unistd::mkfifo;
    use std::io::{BufRead, BufReader, Write};
    use std::thread;

    /// Create `engine.in` / `engine.out` FIFOs in a fresh directory.
    fn fifos() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("engine.in");
        let output = dir.path().join("engine.out");
        mkfifo(&input, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        mkfifo(&output, Mode::S_IRUSR | Mode::S_IWUSR).unwrap();
        (dir, input, output)
    }

    fn open_with_engine(order: OpenOrder, engine_order: OpenOrder) {
        let (_dir, input, output) = fifos();

        // The engine side opens the opposite ends in its own order
        let (engine_in, engine_out) = (input.clone(), output.clone());
        let engine = thread::spawn(move || {
            let (commands, mut responses) = match engine_order {
                OpenOrder::InputFirst => {
                    let commands = File::open(&engine_in).unwrap();
                    (commands, OpenOptions::new().write(true).open(&engine_out).unwrap())
                }
                OpenOrder::OutputFirst => {
                    let responses = OpenOptions::new().write(true).open(&engine_out).unwrap();
                    (File::open(&engine_in).unwrap(), responses)
                }
            };
            let mut line = String::new();
            BufReader::new(commands).read_line(&mut line).unwrap();
            responses.write_all(line.as_bytes()).unwrap();
        });

        let mut channels = EngineChannels::open(&input, &output, order).unwrap();
        channels.input.write_line(b"isready\n").unwrap();

        let mut out = Vec::new();
        assert_eq!(channels.output.read_line(&mut out).unwrap(), ReadOutcome::Line(8));
        assert_eq!(out, b"isready\n");

        engine.join().unwrap();
        assert_eq!(channels.output.read_line(&mut out).unwrap(), ReadOutcome::Eof);
        channels.close();
    }

    #[test]
    fn test_open_output_first() {
        open_with_engine(OpenOrder::OutputFirst, OpenOrder::OutputFirst);
    }

    #[test]
    fn test_open_input_first() {
        open_with_engine(OpenOrder::InputFirst, OpenOrder::InputFirst);
    }

    #[test]
    fn test_missing_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        match EngineChannels::open(&missing, &missing, OpenOrder::InputFirst) {
            Err(EngineError::OpenInput(path, _)) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a missing endpoint"),
        }
        match EngineChannels::open(&missing, &missing, OpenOrder::OutputFirst) {
            Err(EngineError::OpenOutput(path, _)) => assert_eq!(path, missing),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a missing endpoint"),
        }
    }
}
