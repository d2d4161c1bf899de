//! Configuration Manager

use super::{Config, Mode};
use crate::relay::DATAGRAM_BUFFER_SIZE;
use crate::transport::{endpoint::parse_port, Endpoint, Protocol};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use std::time::Duration;

/// Manages configuration loading and validation
pub struct ConfigManager;

/// Values given on the command line; each one that is set wins over the
/// file and environment
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub protocol: Option<Protocol>,
    pub listen: bool,
    pub host: Option<String>,
    pub port: Option<String>,
    pub proxy_port: Option<u16>,
    pub target: Option<Endpoint>,
    pub dial_timeout: Option<Duration>,
    pub log_level: Option<String>,
}

impl ConfigManager {
    /// Load configuration from file
    ///
    /// Validation is left to the caller, which usually still has
    /// environment and CLI overrides to apply.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            tracing::info!("Configuration loaded successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            Ok(Config::default())
        }
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        Self::apply_env(&mut config)?;
        Ok(config)
    }

    /// Override `config` with `RELAYCAT_*` environment variables that are set
    pub fn apply_env(config: &mut Config) -> Result<()> {
        if let Ok(protocol) = std::env::var("RELAYCAT_PROTOCOL") {
            config.session.protocol = protocol
                .parse()
                .with_context(|| format!("Invalid RELAYCAT_PROTOCOL: {}", protocol))?;
        }

        if let Ok(host) = std::env::var("RELAYCAT_HOST") {
            config.session.host = host;
        }

        if let Ok(port) = std::env::var("RELAYCAT_PORT") {
            config.session.port =
                parse_port(&port).with_context(|| format!("Invalid RELAYCAT_PORT: {}", port))?;
        }

        if let Ok(target) = std::env::var("RELAYCAT_PROXY_TARGET") {
            config.proxy.target = Some(
                target
                    .parse()
                    .with_context(|| format!("Invalid RELAYCAT_PROXY_TARGET: {}", target))?,
            );
        }

        if let Ok(timeout) = std::env::var("RELAYCAT_DIAL_TIMEOUT") {
            config.relay.dial_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid RELAYCAT_DIAL_TIMEOUT: {}", timeout))?;
        }

        if let Ok(log_level) = std::env::var("RELAYCAT_LOG_LEVEL") {
            config.logging.level = log_level;
        }

        Ok(())
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_session_config()
            .with_context(|| "Session configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        self.validate_logging_config()
            .with_context(|| "Logging configuration validation failed")?;

        Ok(())
    }

    fn validate_session_config(&self) -> Result<()> {
        match self.session.mode {
            Mode::Connect => {
                if self.session.host.is_empty() {
                    bail!("connect mode requires a remote host");
                }
                if self.session.port == 0 {
                    bail!("connect mode requires a non-zero port");
                }
            }
            Mode::Listen => {}
            Mode::Proxy => {
                if self.session.protocol != Protocol::Tcp {
                    bail!("proxy mode only supports tcp");
                }
                let target = match &self.proxy.target {
                    Some(target) => target,
                    None => bail!("proxy mode requires a target"),
                };
                if target.host.is_empty() || target.port == 0 {
                    bail!("proxy target '{}' must name a host and a non-zero port", target);
                }
            }
        }

        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.stream_buffer_size < 1024 {
            bail!("stream_buffer_size must be at least 1024 bytes");
        }

        if self.relay.stream_buffer_size > 1048576 {
            bail!("stream_buffer_size cannot exceed 1MB");
        }

        // Anything smaller would truncate a full-size datagram
        if self.relay.datagram_buffer_size < DATAGRAM_BUFFER_SIZE {
            bail!(
                "datagram_buffer_size must be at least {} bytes",
                DATAGRAM_BUFFER_SIZE
            );
        }

        if self.relay.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "logging.level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments and pick the mode they imply
    pub fn merge_with_cli_args(&mut self, cli: &CliOverrides) -> Result<()> {
        if let Some(protocol) = cli.protocol {
            self.session.protocol = protocol;
            tracing::info!("CLI override: protocol set to {}", protocol);
        }

        if let Some(host) = &cli.host {
            self.session.host = host.clone();
            tracing::info!("CLI override: host set to {}", host);
        }

        if let Some(port) = &cli.port {
            self.session.port = parse_port(port)?;
            tracing::info!("CLI override: port set to {}", self.session.port);
        }

        if let Some(target) = &cli.target {
            self.proxy.target = Some(target.clone());
            tracing::info!("CLI override: proxy target set to {}", target);
        }

        if let Some(timeout) = cli.dial_timeout {
            self.relay.dial_timeout = timeout;
            tracing::info!("CLI override: dial timeout set to {:?}", timeout);
        }

        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }

        if let Some(proxy_port) = cli.proxy_port {
            self.proxy.listen_port = proxy_port;
            self.session.mode = Mode::Proxy;
        } else if cli.listen {
            self.session.mode = Mode::Listen;
        } else if cli.host.is_some() {
            self.session.mode = Mode::Connect;
        }

        Ok(())
    }
}
