//! relaycat - netcat-style TCP/UDP relay
//!
//! Relays stdin/stdout with a remote peer, or relays inbound TCP
//! connections to a fixed target in proxy mode.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaycat::{
    config::{CliOverrides, ConfigManager, Mode},
    runner, Endpoint, Protocol, ShutdownCoordinator, SystemTransport,
};

/// CLI arguments for relaycat
#[derive(Parser, Debug)]
#[command(name = "relaycat")]
#[command(about = "relaycat - netcat-style TCP/UDP relay")]
#[command(version)]
#[command(long_about = "
relaycat - netcat-style TCP/UDP relay

Connect mode:  relaycat --host 127.0.0.1 --port 9999
Listen mode:   relaycat --listen --port 9999 [--proto udp]
Proxy mode:    relaycat --proxy-port 8080 --target 10.0.0.5:80

In UDP sessions a datagram consisting of exactly '~.' ends the session.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Environment variables
3. Configuration file
4. Built-in defaults

Environment variables:
  RELAYCAT_PROTOCOL      - tcp or udp
  RELAYCAT_HOST          - Remote host (connect) or bind host (listen)
  RELAYCAT_PORT          - Port, e.g. 9999 or :9999
  RELAYCAT_PROXY_TARGET  - Proxy target, e.g. 10.0.0.5:80
  RELAYCAT_DIAL_TIMEOUT  - Dial timeout (e.g. 10s)
  RELAYCAT_LOG_LEVEL     - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "relaycat.toml")]
    pub config: PathBuf,

    /// Transport protocol (tcp or udp)
    #[arg(long = "proto", value_parser = parse_protocol)]
    pub protocol: Option<Protocol>,

    /// Listen mode
    #[arg(short, long)]
    pub listen: bool,

    /// Remote host to connect to, e.g. 127.0.0.1
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on or connect to, e.g. 9999 or :9999
    #[arg(short, long)]
    pub port: Option<String>,

    /// Run as a TCP proxy listening on this port
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Proxy target as host:port
    #[arg(long, value_parser = parse_endpoint)]
    pub target: Option<Endpoint>,

    /// Dial timeout, e.g. 5s
    #[arg(long, value_parser = humantime::parse_duration)]
    pub dial_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_endpoint(s: &str) -> Result<Endpoint, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

impl CliArgs {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            protocol: self.protocol,
            listen: self.listen,
            host: self.host.clone(),
            port: self.port.clone(),
            proxy_port: self.proxy_port,
            target: self.target.clone(),
            dial_timeout: self.dial_timeout,
            log_level: if self.verbose {
                Some("debug".to_string())
            } else {
                self.log_level.clone()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Configuration priority: CLI args > environment > config file > defaults
    let mut config = ConfigManager::load_from_file(&args.config)?;
    ConfigManager::apply_env(&mut config)?;
    config.merge_with_cli_args(&args.overrides())?;

    init_tracing(&config.logging.level)?;

    if config.session.mode == Mode::Connect && config.session.host.is_empty() {
        CliArgs::command().print_help()?;
        std::process::exit(2);
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Mode: {}", config.session.mode);
        info!("  Protocol: {}", config.session.protocol);
        info!("  Endpoint: {}", config.session.endpoint());
        if config.session.mode == Mode::Proxy {
            info!("  Proxy listen: {}", config.proxy.listen_endpoint());
        }
        info!("  Dial timeout: {:?}", config.relay.dial_timeout);
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new();
    let signalled = shutdown.signalled();
    let provider = Arc::new(SystemTransport::new());

    let result = tokio::select! {
        result = runner::run(&config, provider, signalled) => result,
        signal = shutdown.listen_for_signals() => {
            if let Err(e) = signal {
                error!("Error setting up signal handlers: {}", e);
            }
            Ok(None)
        }
    };

    if let Some(report) = result? {
        if report.aborted() {
            error!("Session {} aborted by a write error", report.session_id);
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Initialize tracing/logging on stderr; stdout carries relayed data
fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .with_ansi(false),
        )
        .with(env_filter)
        .init();

    Ok(())
}
