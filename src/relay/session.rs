//! Session coordinator: one client's occupancy of the engine.

use crate::control::NodeControl;
use crate::engine::EngineChannels;
use crate::relay::pump::{Direction, Pump, PumpControl, PumpExit};
use crate::runtime::{LineReader, LineWriter};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use tracing::{error, info};

/// How each direction of a finished session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub client_to_engine: PumpExit,
    pub engine_to_client: PumpExit,
}

/// A connected client, ready to be relayed to the engine.
pub struct Session<'a> {
    client: TcpStream,
    peer: SocketAddr,
    engine: &'a mut EngineChannels,
    node: &'a NodeControl,
    trace: bool,
}

impl<'a> Session<'a> {
    pub fn new(
        client: TcpStream,
        peer: SocketAddr,
        engine: &'a mut EngineChannels,
        node: &'a NodeControl,
    ) -> Self {
        Self {
            client,
            peer,
            engine,
            node,
            trace: false,
        }
    }

    /// Log every relayed line.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Relay until both directions have stopped, then close the client.
    ///
    /// Pump failures end the session and are reported, never returned as
    /// errors. An error means the session could not be set up at all.
    pub fn run(self) -> io::Result<SessionReport> {
        let Session {
            client,
            peer,
            engine,
            node,
            trace,
        } = self;

        let mut client_reader = LineReader::new(client.try_clone()?)?;
        let mut client_writer = LineWriter::new(client);
        let EngineChannels {
            input: engine_input,
            output: engine_output,
        } = engine;

        // The client reader is new; the engine reader may still carry a
        // cancellation from the previous session.
        let engine_canceller = engine_output.canceller();
        node.arm(&engine_canceller);
        let _client_watch = node.watch(client_reader.canceller());

        let inbound = PumpControl::new(client_reader.canceller());
        let outbound = PumpControl::new(engine_canceller);

        // Both are marked before either thread exists, so a pump that
        // finishes at once still finds its peer running and cancels it.
        inbound.mark_running();
        outbound.mark_running();

        info!(%peer, "Session started");

        let report = thread::scope(|scope| {
            let to_engine = Pump::new(
                Direction::ClientToEngine,
                &mut client_reader,
                engine_input,
                &inbound,
                &outbound,
                node,
            )
            .with_trace(trace);
            let to_client = Pump::new(
                Direction::EngineToClient,
                engine_output,
                &mut client_writer,
                &outbound,
                &inbound,
                node,
            )
            .with_trace(trace);

            let inbound_handle = match thread::Builder::new()
                .name(Direction::ClientToEngine.thread_name().to_string())
                .spawn_scoped(scope, move || to_engine.run())
            {
                Ok(handle) => handle,
                Err(e) => {
                    error!(
                        error = %e,
                        direction = %Direction::ClientToEngine,
                        "Failed to start pump"
                    );
                    inbound.mark_stopped();
                    outbound.mark_stopped();
                    return SessionReport {
                        client_to_engine: PumpExit::Aborted,
                        engine_to_client: PumpExit::Aborted,
                    };
                }
            };

            let engine_to_client = match thread::Builder::new()
                .name(Direction::EngineToClient.thread_name().to_string())
                .spawn_scoped(scope, move || to_client.run())
            {
                Ok(handle) => handle.join().unwrap_or(PumpExit::Aborted),
                Err(e) => {
                    error!(
                        error = %e,
                        direction = %Direction::EngineToClient,
                        "Failed to start pump"
                    );
                    outbound.mark_stopped();
                    inbound.cancel();
                    PumpExit::Aborted
                }
            };
            let client_to_engine = inbound_handle.join().unwrap_or(PumpExit::Aborted);

            SessionReport {
                client_to_engine,
                engine_to_client,
            }
        });

        drop(client_reader);
        drop(client_writer);
        info!(
            %peer,
            client_to_engine = %report.client_to_engine,
            engine_to_client = %report.engine_to_client,
            "Session ended"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::StopReason;
    use crate::runtime::{create_listener, LineSink, LineSource, ReadOutcome};
    use std::fs::File;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    /// Engine channels backed by socket pairs; returns the engine's ends.
    fn engine() -> (EngineChannels, UnixStream, UnixStream) {
        let (node_in, engine_in) = UnixStream::pair().unwrap();
        let (node_out, engine_out) = UnixStream::pair().unwrap();
        let channels = EngineChannels::from_files(
            File::from(OwnedFd::from(node_in)),
            File::from(OwnedFd::from(node_out)),
        )
        .unwrap();
        (channels, engine_in, engine_out)
    }

    /// Accept one client on loopback; returns (server side, peer, client side).
    fn connect() -> (TcpStream, SocketAddr, TcpStream) {
        let listener: TcpListener = create_listener("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (server, peer, client)
    }

    fn read_line(reader: &mut BufReader<impl std::io::Read>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    }

    #[test]
    fn test_duplex_relay_then_quit() {
        let (mut channels, engine_in, mut engine_out) = engine();
        let (server, peer, mut client) = connect();
        let node = NodeControl::new();

        let relay = thread::spawn(move || {
            let report = Session::new(server, peer, &mut channels, &node)
                .with_trace(true)
                .run()
                .unwrap();
            (report, node.is_running(), channels)
        });

        client.write_all(b"position startpos moves e2e4\ngo depth 1\n").unwrap();
        let mut engine_reader = BufReader::new(engine_in.try_clone().unwrap());
        assert_eq!(read_line(&mut engine_reader), "position startpos moves e2e4\n");
        assert_eq!(read_line(&mut engine_reader), "go depth 1\n");

        engine_out.write_all(b"info depth 1\nbestmove e7e5\n").unwrap();
        let mut client_reader = BufReader::new(client.try_clone().unwrap());
        assert_eq!(read_line(&mut client_reader), "info depth 1\n");
        assert_eq!(read_line(&mut client_reader), "bestmove e7e5\n");

        // Quit ends the session without reaching the engine and without
        // waiting for any engine output
        client.write_all(b"quit\n").unwrap();
        let (report, running, _channels) = relay.join().unwrap();

        assert!(matches!(report.client_to_engine, PumpExit::Quit));
        assert!(matches!(report.engine_to_client, PumpExit::Cancelled));
        assert!(running);

        // The node closed the client connection
        assert_eq!(read_line(&mut client_reader), "");
    }

    #[test]
    fn test_client_hangup_unblocks_engine_pump() {
        let (mut channels, _engine_in, _engine_out) = engine();
        let (server, peer, client) = connect();
        let node = NodeControl::new();

        drop(client);
        let report = Session::new(server, peer, &mut channels, &node).run().unwrap();

        assert!(matches!(report.client_to_engine, PumpExit::Eof));
        assert!(matches!(report.engine_to_client, PumpExit::Cancelled));
        assert!(node.is_running());
    }

    #[test]
    fn test_engine_exit_stops_node() {
        let (mut channels, _engine_in, engine_out) = engine();
        let (server, peer, _client) = connect();
        let node = NodeControl::new();

        drop(engine_out);
        let report = Session::new(server, peer, &mut channels, &node).run().unwrap();

        assert!(matches!(report.engine_to_client, PumpExit::Eof));
        assert!(matches!(report.client_to_engine, PumpExit::Cancelled));
        assert_eq!(node.stop_reason(), Some(StopReason::EngineExited));
    }

    #[test]
    fn test_node_stop_unblocks_idle_session() {
        let (mut channels, _engine_in, _engine_out) = engine();
        let (server, peer, _client) = connect();
        let node = std::sync::Arc::new(NodeControl::new());

        let engine_watch_node = std::sync::Arc::clone(&node);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            engine_watch_node.stop(StopReason::Interrupted);
        });

        // The node loop keeps the engine reader watched for the node's life
        let _engine_watch = node.watch(channels.output.canceller());
        let report = Session::new(server, peer, &mut channels, &node).run().unwrap();
        stopper.join().unwrap();

        assert!(matches!(report.client_to_engine, PumpExit::Cancelled));
        assert!(matches!(report.engine_to_client, PumpExit::Cancelled));
    }

    #[test]
    fn test_engine_reader_reusable_after_session() {
        let (mut channels, _engine_in, mut engine_out) = engine();
        let node = NodeControl::new();

        for _ in 0..2 {
            let (server, peer, client) = connect();
            drop(client);
            Session::new(server, peer, &mut channels, &node).run().unwrap();
        }

        // The last session cancelled the engine reader; re-arming clears it
        node.arm(&channels.output.canceller());
        engine_out.write_all(b"readyok\n").unwrap();
        let mut line = Vec::new();
        assert_eq!(channels.output.read_line(&mut line).unwrap(), ReadOutcome::Line(8));
        channels.input.write_line(b"stop\n").unwrap();
    }
}
