//! Run Modes
//!
//! Process-level orchestration: picks connect, listen or proxy from the
//! configuration, obtains connections from a transport provider and hands
//! them to the relays.

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{Config, Mode};
use crate::error::RelayError;
use crate::proxy::serve_proxy_until;
use crate::relay::{self, PacketRelay, SessionReport, StreamRelay};
use crate::transport::{Listener, TransportProvider};
use crate::Result;

/// Dial the configured remote peer and relay it with the local endpoints
///
/// A dial or resolve failure is returned to the caller: there is nothing
/// else to do in this mode.
pub async fn connect<R, W>(
    config: &Config,
    provider: &dyn TransportProvider,
    reader: R,
    writer: W,
) -> Result<SessionReport>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let protocol = config.session.protocol;
    let address = config.session.endpoint().to_string();
    let dial_timeout = config.relay.dial_timeout;

    let transport = timeout(dial_timeout, provider.dial(protocol, &address))
        .await
        .map_err(|_| RelayError::DialTimeout {
            address: address.clone(),
            timeout: dial_timeout,
        })?
        .with_context(|| format!("Unable to reach {} {}", protocol, address))?;
    info!("Connected to {} {}", protocol, address);

    Ok(relay::run(transport, reader, writer, &config.relay).await)
}

/// Wait for one remote peer on the configured address and relay it with the
/// local endpoints
///
/// Stream listeners relay the first connection they manage to accept; failed
/// accepts are logged and accepting continues. Datagram listeners relay
/// right away and learn their peer from the first datagram.
pub async fn listen<R, W>(
    config: &Config,
    provider: &dyn TransportProvider,
    reader: R,
    writer: W,
) -> Result<SessionReport>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let protocol = config.session.protocol;
    let address = config.session.endpoint().bind_address();
    let listener = provider.listen(protocol, &address).await?;
    info!(
        "Listening on {} {}",
        protocol,
        listener
            .local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or(address)
    );

    let report = match listener {
        Listener::Stream(listener) => {
            let connection = loop {
                match listener.accept().await {
                    Ok(connection) => break connection,
                    Err(e) => {
                        warn!("{}", RelayError::Accept(e));
                        tokio::task::yield_now().await;
                    }
                }
            };
            StreamRelay::from_config(&config.relay)
                .relay(connection, reader, writer)
                .await
        }
        Listener::Packet(socket) => {
            PacketRelay::from_config(&config.relay)
                .relay(socket, reader, writer)
                .await
        }
    };
    Ok(report)
}

/// Run the proxy dispatcher until `shutdown` resolves
pub async fn proxy<F>(
    config: &Config,
    provider: Arc<dyn TransportProvider>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let target = match &config.proxy.target {
        Some(target) => target.clone(),
        None => bail!("proxy mode requires a target"),
    };
    serve_proxy_until(
        &config.proxy.listen_endpoint(),
        target,
        provider,
        &config.relay,
        shutdown,
    )
    .await?;
    Ok(())
}

/// Run the configured mode with local stdio as the local endpoints
///
/// Returns the session report for connect/listen modes and `None` once the
/// proxy has been shut down.
pub async fn run<F>(
    config: &Config,
    provider: Arc<dyn TransportProvider>,
    shutdown: F,
) -> Result<Option<SessionReport>>
where
    F: Future<Output = ()>,
{
    info!(
        "Starting {} mode over {}",
        config.session.mode, config.session.protocol
    );
    match config.session.mode {
        Mode::Connect => {
            let report = connect(
                config,
                provider.as_ref(),
                tokio::io::stdin(),
                tokio::io::stdout(),
            )
            .await?;
            Ok(Some(report))
        }
        Mode::Listen => {
            let report = listen(
                config,
                provider.as_ref(),
                tokio::io::stdin(),
                tokio::io::stdout(),
            )
            .await?;
            Ok(Some(report))
        }
        Mode::Proxy => {
            proxy(config, provider, shutdown).await?;
            Ok(None)
        }
    }
}
