//! uci-node: expose a UCI chess engine to one TCP client at a time
//!
//! The engine runs as a separate process reachable through two named
//! pipes (its input and its output). The node:
//! - resets the engine with a `uci` / `ucinewgame` / `position startpos`
//!   handshake before every client
//! - relays lines in both directions between the client and the engine
//! - ends the session when the client disconnects or sends `quit`
//! - shuts down when the engine exits or on SIGINT, SIGTERM or SIGHUP
//!
//! Configuration via CLI arguments or TOML file.

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("uci-node requires Linux or macOS (epoll or kqueue)");

mod config;
mod control;
mod engine;
mod node;
mod relay;
mod runtime;
mod signal;

use config::Config;
use control::NodeControl;
use engine::EngineChannels;
use node::Node;
use runtime::{create_listener, Acceptor};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();

    let addr = config.listen_addr()?;
    info!(
        %addr,
        backlog = config.backlog,
        engine_input = %config.engine_input.display(),
        engine_output = %config.engine_output.display(),
        open_order = ?config.open_order,
        trace = config.trace,
        "Starting uci-node"
    );

    // Opening a FIFO blocks until the engine opens the other end; default
    // signal dispositions stay in effect until it has.
    let engine = EngineChannels::open(
        &config.engine_input,
        &config.engine_output,
        config.open_order,
    )?;

    let control = Arc::new(NodeControl::new());
    let signals = signal::install(Arc::clone(&control))?;

    let result = serve(&config, addr, engine, control);
    signals.close();
    result
}

fn serve(
    config: &Config,
    addr: SocketAddr,
    engine: EngineChannels,
    control: Arc<NodeControl>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = create_listener(addr, config.backlog)?;
    let acceptor = Acceptor::new(listener)?;
    info!(addr = %acceptor.local_addr()?, "Listening");

    Node::new(acceptor, engine, control)
        .with_trace(config.trace)
        .run()?;
    Ok(())
}
