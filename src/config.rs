//! Configuration module for uci-node.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Order in which the two engine endpoints are opened.
///
/// Opening a FIFO blocks until the other side opens it too, so this must
/// mirror the order the engine wrapper opens them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OpenOrder {
    /// Open the engine's output (response) endpoint, then its input.
    #[default]
    OutputFirst,
    /// Open the engine's input (request) endpoint, then its output.
    InputFirst,
}

/// Command-line arguments for the node
#[derive(Parser, Debug)]
#[command(name = "uci-node")]
#[command(author = "uci-node authors")]
#[command(version = "0.1.0")]
#[command(about = "Serve a FIFO-attached UCI engine to one TCP client at a time")]
#[command(long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on (empty for all interfaces)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Endpoint the engine reads commands from
    #[arg(long)]
    pub engine_input: Option<PathBuf>,

    /// Endpoint the engine writes responses to
    #[arg(long)]
    pub engine_output: Option<PathBuf>,

    /// Which engine endpoint to open first
    #[arg(long, value_enum)]
    pub open_order: Option<OpenOrder>,

    /// Log every relayed line
    #[arg(short = 'd', long)]
    pub trace: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Engine endpoint configuration
#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_engine_input")]
    pub input: PathBuf,
    #[serde(default = "default_engine_output")]
    pub output: PathBuf,
    #[serde(default)]
    pub open_order: OpenOrder,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input: default_engine_input(),
            output: default_engine_output(),
            open_order: OpenOrder::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log every relayed line
    #[serde(default)]
    pub trace: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            trace: false,
        }
    }
}

fn default_port() -> u16 {
    5555
}

fn default_backlog() -> i32 {
    1
}

fn default_engine_input() -> PathBuf {
    PathBuf::from("stdin")
}

fn default_engine_output() -> PathBuf {
    PathBuf::from("stdout")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub engine_input: PathBuf,
    pub engine_output: PathBuf,
    pub open_order: OpenOrder,
    pub trace: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            engine_input: cli.engine_input.unwrap_or(toml_config.engine.input),
            engine_output: cli.engine_output.unwrap_or(toml_config.engine.output),
            open_order: cli.open_order.unwrap_or(toml_config.engine.open_order),
            trace: cli.trace || toml_config.logging.trace,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        // Reject a bad address before any endpoint is opened
        config.listen_addr()?;
        Ok(config)
    }

    /// Socket address to listen on. An empty host means all interfaces.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = self.host.trim();
        let ip = if host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            host.parse()
                .map_err(|_| ConfigError::InvalidHost(self.host.clone()))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen host '{0}'")]
    InvalidHost(String),
}
