//! Blocking, cancellable I/O primitives.
//!
//! Every blocking wait in the node goes through a private `mio::Poll`
//! (epoll on Linux, kqueue on macOS) that also watches a waker, so any wait
//! can be interrupted from another thread:
//! - `LineReader` / `LineWriter`: newline-delimited reads and writes
//! - `Acceptor`: waiting for the next client
//! - `Canceller`: the interrupt shared by both

mod buffer;
mod cancel;
mod line;
mod listener;

pub use buffer::MAX_LINE_LEN;
pub use cancel::Canceller;
pub use line::{LineReader, LineSink, LineSource, LineWriter, ReadOutcome};
pub use listener::{create_listener, AcceptOutcome, Acceptor};
