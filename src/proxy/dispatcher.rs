//! Proxy Dispatcher Implementation

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::relay::{SessionReport, StreamRelay};
use crate::transport::{
    BoxedStream, Endpoint, Listener, Protocol, StreamConnection, StreamListener, Transport,
    TransportProvider,
};

/// Lifecycle of one accepted proxy connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxySessionState {
    Accepted,
    Dialing,
    Relaying,
    /// Terminal: the outbound dial failed and the inbound connection was dropped
    DialFailed,
    /// Terminal: the relay finished
    Closed,
}

impl fmt::Display for ProxySessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxySessionState::Accepted => "ACCEPTED",
            ProxySessionState::Dialing => "DIALING",
            ProxySessionState::Relaying => "RELAYING",
            ProxySessionState::DialFailed => "DIAL_FAILED",
            ProxySessionState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Read-only parameters shared by every proxy session
struct DialContext {
    target: Endpoint,
    provider: Arc<dyn TransportProvider>,
    relay: StreamRelay,
    dial_timeout: Duration,
}

impl DialContext {
    async fn dial(&self) -> Result<BoxedStream, RelayError> {
        let address = self.target.to_string();
        let dialed = timeout(self.dial_timeout, self.provider.dial(Protocol::Tcp, &address))
            .await
            .map_err(|_| RelayError::DialTimeout {
                address: address.clone(),
                timeout: self.dial_timeout,
            })??;

        match dialed {
            Transport::Stream(stream) => Ok(stream),
            Transport::Packet(_) => Err(RelayError::UnsupportedTransport {
                protocol: Protocol::Udp,
                operation: "proxy relay",
            }),
        }
    }
}

/// Decrements the active session count when a session task ends
struct ActiveSessionGuard(Arc<AtomicUsize>);

impl ActiveSessionGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts inbound stream connections and relays each one to a fixed target
pub struct ProxyDispatcher {
    listener: Box<dyn StreamListener>,
    context: Arc<DialContext>,
    active_sessions: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
}

impl ProxyDispatcher {
    /// Open the listening socket through `provider`
    pub async fn bind(
        listen_address: &Endpoint,
        dial_target: Endpoint,
        provider: Arc<dyn TransportProvider>,
        config: &RelayConfig,
    ) -> Result<Self, RelayError> {
        let address = listen_address.bind_address();
        info!("Binding proxy listener to {}", address);

        let listener = match provider.listen(Protocol::Tcp, &address).await? {
            Listener::Stream(listener) => listener,
            Listener::Packet(_) => {
                return Err(RelayError::UnsupportedTransport {
                    protocol: Protocol::Udp,
                    operation: "proxy listen",
                })
            }
        };

        Ok(Self::from_listener(listener, dial_target, provider, config))
    }

    /// Build a dispatcher around an already bound listener
    pub fn from_listener(
        listener: Box<dyn StreamListener>,
        dial_target: Endpoint,
        provider: Arc<dyn TransportProvider>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            listener,
            context: Arc::new(DialContext {
                target: dial_target,
                provider,
                relay: StreamRelay::from_config(config),
                dial_timeout: config.dial_timeout,
            }),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of proxy sessions currently dialing or relaying
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Accept connections forever
    pub async fn run(&self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Sessions already in flight keep running after the loop stops.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            "Proxy accepting on {:?}, relaying to {}",
            self.local_addr().ok(),
            self.context.target
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping proxy accept loop");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(inbound) => self.spawn_session(inbound),
                    Err(e) => {
                        warn!("{}", RelayError::Accept(e));
                        tokio::task::yield_now().await;
                    }
                },
            }
        }
    }

    fn spawn_session(&self, inbound: BoxedStream) {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let peer = inbound.peer_addr();
        let span = info_span!("proxy_connection", id = connection_id, peer = ?peer);
        let context = Arc::clone(&self.context);
        let guard = ActiveSessionGuard::new(&self.active_sessions);

        tokio::spawn(
            async move {
                let _guard = guard;
                handle_connection(inbound, &context).await;
            }
            .instrument(span),
        );
    }
}

fn transition(state: ProxySessionState) -> ProxySessionState {
    debug!(state = %state, "Proxy session state");
    state
}

/// Drive one accepted connection to a terminal state
async fn handle_connection(inbound: BoxedStream, context: &DialContext) -> ProxySessionState {
    transition(ProxySessionState::Accepted);
    transition(ProxySessionState::Dialing);

    let outbound = match context.dial().await {
        Ok(outbound) => outbound,
        Err(e) => {
            warn!(target_addr = %context.target, error = %e, "Dial failed, dropping inbound connection");
            drop(inbound);
            return transition(ProxySessionState::DialFailed);
        }
    };
    info!(
        "Connected to {} for {:?}",
        context.target,
        inbound.peer_addr()
    );

    transition(ProxySessionState::Relaying);
    let report = relay_pair(&context.relay, outbound, inbound).await;
    debug!(
        bytes_to_target = report.bytes_sent(),
        bytes_to_client = report.bytes_received(),
        "Proxy session finished"
    );
    transition(ProxySessionState::Closed)
}

/// Relay `outbound` using the inbound connection as both local endpoints
async fn relay_pair(
    relay: &StreamRelay,
    outbound: BoxedStream,
    inbound: BoxedStream,
) -> SessionReport {
    let (inbound_reader, inbound_writer) = tokio::io::split(inbound);
    relay.relay(outbound, inbound_reader, inbound_writer).await
}

/// Listen on `listen_address` and relay every inbound connection to
/// `dial_target` until the process stops
pub async fn serve_proxy(
    listen_address: &Endpoint,
    dial_target: Endpoint,
    provider: Arc<dyn TransportProvider>,
    config: &RelayConfig,
) -> Result<(), RelayError> {
    let dispatcher = ProxyDispatcher::bind(listen_address, dial_target, provider, config).await?;
    dispatcher.run().await;
    Ok(())
}

/// Like [`serve_proxy`], but stops accepting once `shutdown` resolves
pub async fn serve_proxy_until<F>(
    listen_address: &Endpoint,
    dial_target: Endpoint,
    provider: Arc<dyn TransportProvider>,
    config: &RelayConfig,
    shutdown: F,
) -> Result<(), RelayError>
where
    F: Future<Output = ()>,
{
    let dispatcher = ProxyDispatcher::bind(listen_address, dial_target, provider, config).await?;
    dispatcher.run_until(shutdown).await;
    Ok(())
}
