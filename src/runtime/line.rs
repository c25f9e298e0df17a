//! Line channel: blocking, cancellable line reads and blocking line writes.
//!
//! `LineReader` puts its descriptor in non-blocking mode and waits on a
//! private `mio::Poll` that watches both the descriptor and a `Canceller`
//! waker. From the caller's point of view a read blocks until one of three
//! things happens: a line is available, the source reaches EOF, or the
//! reader is cancelled.
//!
//! `LineWriter` writes every byte it is given. If the descriptor happens to
//! be non-blocking (a socket shared with a `LineReader`), it waits for
//! writability instead of failing with `WouldBlock`.

use crate::runtime::buffer::LineBuffer;
use crate::runtime::cancel::Canceller;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

const SOURCE_TOKEN: Token = Token(0);
const SINK_TOKEN: Token = Token(0);

/// Outcome of a single line read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line (or a full buffer's worth of bytes) of the given length.
    Line(usize),
    /// The source is closed. Never reported while bytes are still buffered.
    Eof,
    /// The read was interrupted by a cancellation request; no data.
    Cancelled,
}

/// Something lines can be read from.
pub trait LineSource {
    /// Replace the contents of `out` with the next line.
    fn read_line(&mut self, out: &mut Vec<u8>) -> io::Result<ReadOutcome>;
}

/// Something lines can be written to.
pub trait LineSink {
    /// Write `line` exactly as given.
    fn write_line(&mut self, line: &[u8]) -> io::Result<()>;
}

/// Put a descriptor in non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: F_GETFL/F_SETFL only touch the status flags of a descriptor
    // the caller keeps open for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: see above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Cancellable line reader over a readable descriptor.
pub struct LineReader<S> {
    source: S,
    poll: Poll,
    events: Events,
    canceller: Arc<Canceller>,
    buffer: LineBuffer,
    /// The descriptor may have bytes we have not read yet.
    readable: bool,
    /// The descriptor returned a zero-length read.
    eof: bool,
}

impl<S: Read + AsRawFd> LineReader<S> {
    /// Wrap `source`, switching it to non-blocking mode.
    pub fn new(source: S) -> io::Result<Self> {
        let fd = source.as_raw_fd();
        set_nonblocking(fd)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&fd), SOURCE_TOKEN, Interest::READABLE)?;
        let canceller = Arc::new(Canceller::new(poll.registry())?);

        Ok(Self {
            source,
            poll,
            events: Events::with_capacity(4),
            canceller,
            buffer: LineBuffer::default(),
            readable: true,
            eof: false,
        })
    }

    /// Handle that interrupts a blocked `read_line`.
    pub fn canceller(&self) -> Arc<Canceller> {
        Arc::clone(&self.canceller)
    }

    /// Pull bytes from the source until it would block, the buffer fills up,
    /// or EOF.
    fn fill(&mut self) -> io::Result<()> {
        while !self.buffer.is_full() {
            match self.source.read(self.buffer.spare_mut()) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.buffer.commit(n),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Block until the source becomes readable or the waker fires.
    fn wait(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, None) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        // A wake-up needs no handling here: the caller re-checks the
        // cancellation flag on every pass.
        if self.events.iter().any(|event| event.token() == SOURCE_TOKEN) {
            self.readable = true;
        }
        Ok(())
    }
}

impl<S: Read + AsRawFd> LineSource for LineReader<S> {
    fn read_line(&mut self, out: &mut Vec<u8>) -> io::Result<ReadOutcome> {
        loop {
            if self.buffer.take_line(out) {
                return Ok(ReadOutcome::Line(out.len()));
            }
            if self.eof {
                if self.buffer.take_rest(out) {
                    return Ok(ReadOutcome::Line(out.len()));
                }
                return Ok(ReadOutcome::Eof);
            }
            if self.canceller.is_cancelled() {
                return Ok(ReadOutcome::Cancelled);
            }
            if self.readable {
                self.fill()?;
            } else {
                self.wait()?;
            }
        }
    }
}

/// Line writer over a writable descriptor.
pub struct LineWriter<W> {
    sink: W,
    /// Created the first time the sink reports `WouldBlock`.
    poll: Option<Poll>,
    events: Events,
}

impl<W: Write + AsRawFd> LineWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            poll: None,
            events: Events::with_capacity(2),
        }
    }

    fn wait_writable(&mut self) -> io::Result<()> {
        if self.poll.is_none() {
            let poll = Poll::new()?;
            let fd = self.sink.as_raw_fd();
            poll.registry()
                .register(&mut SourceFd(&fd), SINK_TOKEN, Interest::WRITABLE)?;
            self.poll = Some(poll);
        }
        let Some(poll) = self.poll.as_mut() else {
            return Ok(());
        };
        match poll.poll(&mut self.events, None) {
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            other => other,
        }
    }
}

impl<W: Write + AsRawFd> LineSink for LineWriter<W> {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < line.len() {
            match self.sink.write(&line[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => self.wait_writable()?,
                Err(e) => return Err(e),
            }
        }
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::buffer::MAX_LINE_LEN;
    use std::os::unix::net::UnixStream;
    use std::thread;
    use std::time::Duration;

    fn read(reader: &mut LineReader<UnixStream>) -> (ReadOutcome, Vec<u8>) {
        let mut out = Vec::new();
        let outcome = reader.read_line(&mut out).unwrap();
        (outcome, out)
    }

    #[test]
    fn test_lines_arrive_in_order() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();

        tx.write_all(b"id name Stockfish\nid author T\nuciok\n").unwrap();

        assert_eq!(read(&mut reader), (ReadOutcome::Line(18), b"id name Stockfish\n".to_vec()));
        assert_eq!(read(&mut reader), (ReadOutcome::Line(12), b"id author T\n".to_vec()));
        assert_eq!(read(&mut reader), (ReadOutcome::Line(6), b"uciok\n".to_vec()));
    }

    #[test]
    fn test_line_split_across_writes() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();

        let writer = thread::spawn(move || {
            tx.write_all(b"position ").unwrap();
            thread::sleep(Duration::from_millis(20));
            tx.write_all(b"startpos\n").unwrap();
            tx
        });

        assert_eq!(read(&mut reader).1, b"position startpos\n");
        writer.join().unwrap();
    }

    #[test]
    fn test_zero_length_read_is_eof() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();

        tx.write_all(b"go\nbestmove e2e4").unwrap();
        drop(tx);

        assert_eq!(read(&mut reader).1, b"go\n");
        // Unterminated tail is delivered before EOF
        assert_eq!(read(&mut reader).1, b"bestmove e2e4");
        assert_eq!(read(&mut reader).0, ReadOutcome::Eof);
        assert_eq!(read(&mut reader).0, ReadOutcome::Eof);
    }

    #[test]
    fn test_max_length_line() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();

        let mut line = vec![b'x'; MAX_LINE_LEN - 1];
        line.push(b'\n');
        tx.write_all(&line).unwrap();
        tx.write_all(b"next\n").unwrap();

        let (outcome, out) = read(&mut reader);
        assert_eq!(outcome, ReadOutcome::Line(MAX_LINE_LEN));
        assert_eq!(out, line);
        assert_eq!(read(&mut reader).1, b"next\n");
    }

    #[test]
    fn test_cancel_unblocks_read() {
        let (_tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();
        let canceller = reader.canceller();

        let blocked = thread::spawn(move || {
            let mut out = Vec::new();
            let outcome = reader.read_line(&mut out).unwrap();
            (outcome, out)
        });

        thread::sleep(Duration::from_millis(50));
        canceller.cancel();

        let (outcome, out) = blocked.join().unwrap();
        assert_eq!(outcome, ReadOutcome::Cancelled);
        assert!(out.is_empty());
    }

    #[test]
    fn test_rearm_after_cancel() {
        let (mut tx, rx) = UnixStream::pair().unwrap();
        let mut reader = LineReader::new(rx).unwrap();
        let canceller = reader.canceller();

        canceller.cancel();
        assert_eq!(read(&mut reader).0, ReadOutcome::Cancelled);

        canceller.rearm();
        tx.write_all(b"isready\n").unwrap();
        assert_eq!(read(&mut reader).1, b"isready\n");
    }

    #[test]
    fn test_writer_waits_on_nonblocking_sink() {
        let (tx, rx) = UnixStream::pair().unwrap();
        tx.set_nonblocking(true).unwrap();
        let mut writer = LineWriter::new(tx);

        let mut line = vec![b'y'; MAX_LINE_LEN - 1];
        line.push(b'\n');
        let count = 2000;

        // Far more than a socket buffer holds, so the writer must hit WouldBlock
        let drain = thread::spawn(move || {
            let mut reader = LineReader::new(rx).unwrap();
            let mut out = Vec::new();
            let mut lines = 0;
            while let ReadOutcome::Line(n) = reader.read_line(&mut out).unwrap() {
                assert_eq!(n, MAX_LINE_LEN);
                lines += 1;
            }
            lines
        });

        for _ in 0..count {
            writer.write_line(&line).unwrap();
        }
        drop(writer);

        assert_eq!(drain.join().unwrap(), count);
    }

    #[test]
    fn test_write_to_closed_peer_fails() {
        let (tx, rx) = UnixStream::pair().unwrap();
        drop(rx);
        let mut writer = LineWriter::new(tx);
        assert!(writer.write_line(b"uci\n").is_err());
    }
}
