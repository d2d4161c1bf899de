//! Configuration loading, override and validation tests

use anyhow::Result;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

use relaycat::config::{CliOverrides, Config, ConfigManager, Mode};
use relaycat::{Endpoint, Protocol};

#[test]
fn test_load_proxy_config_from_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("relaycat.toml");
    fs::write(
        &config_path,
        r#"
[session]
mode = "proxy"
protocol = "tcp"

[proxy]
listen_port = 8080
listen_host = "127.0.0.1"
target = "10.0.0.5:80"

[relay]
stream_buffer_size = 8192
dial_timeout = "2s 500ms"

[logging]
level = "debug"
"#,
    )?;

    let config = ConfigManager::load_from_file(&config_path)?;
    config.validate()?;

    assert_eq!(config.session.mode, Mode::Proxy);
    assert_eq!(config.proxy.listen_endpoint(), Endpoint::new("127.0.0.1", 8080));
    assert_eq!(config.proxy.target, Some(Endpoint::new("10.0.0.5", 80)));
    assert_eq!(config.relay.stream_buffer_size, 8192);
    assert_eq!(config.relay.dial_timeout, Duration::from_millis(2500));
    assert_eq!(config.logging.level, "debug");
    Ok(())
}

#[test]
fn test_missing_file_yields_defaults() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config = ConfigManager::load_from_file(&temp_dir.path().join("absent.toml"))?;

    assert_eq!(config.session.mode, Mode::Connect);
    assert_eq!(config.session.protocol, Protocol::Tcp);
    assert_eq!(config.session.port, 9999);
    assert_eq!(config.relay.dial_timeout, Duration::from_secs(10));

    // Connect mode without a host is incomplete
    assert!(config.validate().is_err());
    Ok(())
}

#[test]
fn test_malformed_target_is_rejected_on_load() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let config_path = temp_dir.path().join("relaycat.toml");
    fs::write(&config_path, "[proxy]\ntarget = \"no-port-here\"\n")?;

    assert!(ConfigManager::load_from_file(&config_path).is_err());
    Ok(())
}

#[test]
fn test_cli_overrides_select_mode() -> Result<()> {
    let mut config = Config::default();
    config.merge_with_cli_args(&CliOverrides {
        host: Some("127.0.0.1".to_string()),
        port: Some(":9999".to_string()),
        protocol: Some(Protocol::Udp),
        ..Default::default()
    })?;
    assert_eq!(config.session.mode, Mode::Connect);
    assert_eq!(config.session.endpoint(), Endpoint::new("127.0.0.1", 9999));
    assert_eq!(config.session.protocol, Protocol::Udp);
    config.validate()?;

    let mut config = Config::default();
    config.merge_with_cli_args(&CliOverrides {
        listen: true,
        port: Some("4000".to_string()),
        ..Default::default()
    })?;
    assert_eq!(config.session.mode, Mode::Listen);
    assert_eq!(config.session.endpoint().bind_address(), "0.0.0.0:4000");
    config.validate()?;

    let mut config = Config::default();
    config.merge_with_cli_args(&CliOverrides {
        listen: true,
        proxy_port: Some(8080),
        target: Some("localhost:80".parse()?),
        dial_timeout: Some(Duration::from_secs(3)),
        ..Default::default()
    })?;
    assert_eq!(config.session.mode, Mode::Proxy);
    assert_eq!(config.proxy.listen_port, 8080);
    assert_eq!(config.relay.dial_timeout, Duration::from_secs(3));
    config.validate()?;
    Ok(())
}

#[test]
fn test_invalid_port_override_is_an_error() {
    let mut config = Config::default();
    let result = config.merge_with_cli_args(&CliOverrides {
        port: Some("99999".to_string()),
        ..Default::default()
    });
    assert!(result.is_err());
}

#[test]
fn test_validation_failures() {
    let mut config = Config::default();
    config.session.mode = Mode::Proxy;
    assert!(config.validate().is_err(), "proxy without a target");

    config.proxy.target = Some(Endpoint::new("10.0.0.5", 80));
    assert!(config.validate().is_ok());

    config.session.protocol = Protocol::Udp;
    assert!(config.validate().is_err(), "udp proxy");
    config.session.protocol = Protocol::Tcp;

    config.relay.stream_buffer_size = 16;
    assert!(config.validate().is_err(), "tiny stream buffer");
    config.relay.stream_buffer_size = 4096;

    config.relay.datagram_buffer_size = 1500;
    assert!(config.validate().is_err(), "datagram buffer below max datagram size");
    config.relay.datagram_buffer_size = 65535;

    config.relay.dial_timeout = Duration::ZERO;
    assert!(config.validate().is_err(), "zero dial timeout");
    config.relay.dial_timeout = Duration::from_secs(1);

    config.logging.level = "loud".to_string();
    assert!(config.validate().is_err(), "unknown log level");
}

#[test]
fn test_environment_overrides() -> Result<()> {
    std::env::set_var("RELAYCAT_HOST", "192.0.2.10");
    std::env::set_var("RELAYCAT_PORT", ":7000");
    std::env::set_var("RELAYCAT_DIAL_TIMEOUT", "750ms");

    let config = ConfigManager::load_from_env();

    std::env::remove_var("RELAYCAT_HOST");
    std::env::remove_var("RELAYCAT_PORT");
    std::env::remove_var("RELAYCAT_DIAL_TIMEOUT");

    let config = config?;
    assert_eq!(config.session.endpoint(), Endpoint::new("192.0.2.10", 7000));
    assert_eq!(config.relay.dial_timeout, Duration::from_millis(750));
    Ok(())
}
