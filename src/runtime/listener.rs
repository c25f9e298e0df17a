//! Listening socket and cancellable accept.

use crate::runtime::cancel::Canceller;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::Arc;
use tracing::{debug, info};

const LISTENER_TOKEN: Token = Token(0);

/// Create a bound, listening TCP socket.
///
/// The backlog is deliberately small: only one client is ever served at a
/// time and further clients wait in the kernel queue.
pub fn create_listener(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    info!(address = %addr, "Binding listener");
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Result of waiting for a client.
#[derive(Debug)]
pub enum AcceptOutcome {
    /// A client connected. The stream is in blocking mode.
    Accepted(TcpStream, SocketAddr),
    /// The wait was interrupted by a cancellation request.
    Cancelled,
}

/// Blocking accept that can be interrupted through a `Canceller`.
pub struct Acceptor {
    listener: TcpListener,
    poll: Poll,
    events: Events,
    canceller: Arc<Canceller>,
}

impl Acceptor {
    pub fn new(listener: TcpListener) -> io::Result<Self> {
        listener.set_nonblocking(true)?;

        let poll = Poll::new()?;
        let fd = listener.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), LISTENER_TOKEN, Interest::READABLE)?;
        let canceller = Arc::new(Canceller::new(poll.registry())?);

        Ok(Self {
            listener,
            poll,
            events: Events::with_capacity(4),
            canceller,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that interrupts a blocked `accept`.
    pub fn canceller(&self) -> Arc<Canceller> {
        Arc::clone(&self.canceller)
    }

    /// Wait for the next client.
    pub fn accept(&mut self) -> io::Result<AcceptOutcome> {
        loop {
            if self.canceller.is_cancelled() {
                debug!("Accept cancelled");
                return Ok(AcceptOutcome::Cancelled);
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Accepted sockets inherit O_NONBLOCK on some platforms
                    stream.set_nonblocking(false)?;
                    return Ok(AcceptOutcome::Accepted(stream, peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_accept_client() {
        let mut acceptor = Acceptor::new(create_listener(loopback(), 1).unwrap()).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());

        match acceptor.accept().unwrap() {
            AcceptOutcome::Accepted(stream, peer) => {
                assert_eq!(peer, client.join().unwrap().local_addr().unwrap());
                drop(stream);
            }
            AcceptOutcome::Cancelled => panic!("accept was cancelled"),
        }
    }

    #[test]
    fn test_cancel_unblocks_accept() {
        let mut acceptor = Acceptor::new(create_listener(loopback(), 1).unwrap()).unwrap();
        let canceller = acceptor.canceller();

        let waiter = thread::spawn(move || acceptor.accept().unwrap());
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();

        assert!(matches!(waiter.join().unwrap(), AcceptOutcome::Cancelled));
    }
}
