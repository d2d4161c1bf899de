//! Integration tests for the proxy dispatcher

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};

use relaycat::config::RelayConfig;
use relaycat::transport::Listener;
use relaycat::{
    serve_proxy, Endpoint, Protocol, ProxyDispatcher, RelayError, ShutdownCoordinator,
    SystemTransport, Transport, TransportProvider,
};

/// Plain sockets, except dials fail while `refuse_dials` is set
#[derive(Default)]
struct SwitchableTransport {
    inner: SystemTransport,
    refuse_dials: AtomicBool,
    dials: AtomicUsize,
}

impl TransportProvider for SwitchableTransport {
    fn dial<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Transport, RelayError>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.refuse_dials.load(Ordering::SeqCst) {
            let err = RelayError::Dial {
                protocol,
                address: address.to_string(),
                source: std::io::ErrorKind::ConnectionRefused.into(),
            };
            return futures::future::ready(Err(err)).boxed();
        }
        self.inner.dial(protocol, address)
    }

    fn listen<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Listener, RelayError>> {
        self.inner.listen(protocol, address)
    }
}

/// Echo server that answers every connection until the test ends
async fn spawn_echo_server() -> Endpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    Endpoint::from(addr)
}

async fn echo_roundtrip(stream: &mut TcpStream, payload: &[u8]) -> Vec<u8> {
    stream.write_all(payload).await.unwrap();
    let mut buf = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("echo should arrive")
        .unwrap();
    buf
}

async fn start_proxy(
    target: Endpoint,
    provider: Arc<dyn TransportProvider>,
) -> (Arc<ProxyDispatcher>, std::net::SocketAddr, ShutdownCoordinator) {
    let dispatcher = ProxyDispatcher::bind(
        &Endpoint::new("127.0.0.1", 0),
        target,
        provider,
        &RelayConfig::default(),
    )
    .await
    .unwrap();
    let dispatcher = Arc::new(dispatcher);
    let addr = dispatcher.local_addr().unwrap();

    let shutdown = ShutdownCoordinator::new();
    let signalled = shutdown.signalled();
    let running = Arc::clone(&dispatcher);
    tokio::spawn(async move { running.run_until(signalled).await });

    (dispatcher, addr, shutdown)
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_cross_talk() {
    let target = spawn_echo_server().await;
    let (_dispatcher, proxy_addr, _shutdown) =
        start_proxy(target, Arc::new(SystemTransport::new())).await;

    let mut a = TcpStream::connect(proxy_addr).await.unwrap();
    let mut b = TcpStream::connect(proxy_addr).await.unwrap();

    for round in 0..3 {
        let payload_a = format!("A{}", round);
        let payload_b = format!("B{}", round);
        assert_eq!(echo_roundtrip(&mut b, payload_b.as_bytes()).await, payload_b.as_bytes());
        assert_eq!(echo_roundtrip(&mut a, payload_a.as_bytes()).await, payload_a.as_bytes());
    }
}

#[tokio::test]
async fn test_failed_dial_leaves_other_sessions_running() {
    let target = spawn_echo_server().await;
    let provider = Arc::new(SwitchableTransport::default());
    let (dispatcher, proxy_addr, _shutdown) = start_proxy(target, provider.clone()).await;

    let mut a = TcpStream::connect(proxy_addr).await.unwrap();
    let mut b = TcpStream::connect(proxy_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut a, b"A").await, b"A");
    assert_eq!(echo_roundtrip(&mut b, b"B").await, b"B");

    // The target becomes unreachable for the third connection only
    provider.refuse_dials.store(true, Ordering::SeqCst);
    let mut c = TcpStream::connect(proxy_addr).await.unwrap();
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), c.read_to_end(&mut buf))
        .await
        .expect("dropped connection should be closed promptly");
    assert!(read.map(|n| n == 0).unwrap_or(true));
    assert_eq!(provider.dials.load(Ordering::SeqCst), 3);

    assert_eq!(echo_roundtrip(&mut a, b"A again").await, b"A again");
    assert_eq!(echo_roundtrip(&mut b, b"B again").await, b"B again");

    // The listener keeps accepting once the target is back
    provider.refuse_dials.store(false, Ordering::SeqCst);
    let mut d = TcpStream::connect(proxy_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut d, b"D").await, b"D");
    assert!(dispatcher.active_sessions() >= 3);
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let target = spawn_echo_server().await;
    let (dispatcher, proxy_addr, shutdown) =
        start_proxy(target, Arc::new(SystemTransport::new())).await;

    let mut a = TcpStream::connect(proxy_addr).await.unwrap();
    assert_eq!(echo_roundtrip(&mut a, b"before").await, b"before");

    shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The in-flight session is unaffected by the accept loop stopping
    assert_eq!(echo_roundtrip(&mut a, b"after").await, b"after");
    assert_eq!(dispatcher.active_sessions(), 1);

    // New connections may still sit in the backlog but are never relayed
    if let Ok(mut late) = TcpStream::connect(proxy_addr).await {
        let _ = late.write_all(b"late").await;
        let mut buf = [0u8; 4];
        let echoed = timeout(Duration::from_millis(300), late.read_exact(&mut buf)).await;
        assert!(echoed.is_err() || echoed.unwrap().is_err());
    }
}

#[tokio::test]
async fn test_serve_proxy_relays_to_target() {
    let target = spawn_echo_server().await;
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let server = tokio::spawn(async move {
        serve_proxy(
            &Endpoint::new("127.0.0.1", port),
            target,
            Arc::new(SystemTransport::new()),
            &RelayConfig::default(),
        )
        .await
    });

    let mut client = loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => break stream,
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    };
    assert_eq!(echo_roundtrip(&mut client, b"A").await, b"A");

    // Serving only returns on a listen failure
    assert!(!server.is_finished());
    server.abort();
}

#[tokio::test]
async fn test_serve_proxy_reports_listen_failure() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let result = serve_proxy(
        &Endpoint::new("127.0.0.1", port),
        Endpoint::new("127.0.0.1", 9),
        Arc::new(SystemTransport::new()),
        &RelayConfig::default(),
    )
    .await;
    assert!(matches!(result, Err(RelayError::Listen { .. })));
}
