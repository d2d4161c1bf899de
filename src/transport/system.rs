//! Plain Socket Transport

use std::io;
use std::net::SocketAddr;

use futures::future::{BoxFuture, FutureExt};
use tokio::net::{lookup_host, TcpListener, TcpStream, UdpSocket};
use tracing::debug;

use super::{BoxedStream, Listener, Protocol, StreamListener, Transport, TransportProvider};
use crate::error::RelayError;

/// Transport provider backed by the operating system's sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTransport;

impl SystemTransport {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(address: &str) -> Result<Vec<SocketAddr>, RelayError> {
        let addrs: Vec<SocketAddr> = lookup_host(address)
            .await
            .map_err(|source| RelayError::Dial {
                protocol: Protocol::Udp,
                address: address.to_string(),
                source,
            })?
            .collect();
        if addrs.is_empty() {
            return Err(RelayError::Resolve {
                address: address.to_string(),
            });
        }
        Ok(addrs)
    }

    async fn dial_udp(address: &str) -> Result<UdpSocket, RelayError> {
        let target = Self::resolve(address).await?[0];
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let dial_error = |source| RelayError::Dial {
            protocol: Protocol::Udp,
            address: address.to_string(),
            source,
        };
        let socket = UdpSocket::bind(local).await.map_err(dial_error)?;
        socket.connect(target).await.map_err(dial_error)?;
        debug!("UDP socket {:?} connected to {}", socket.local_addr().ok(), target);
        Ok(socket)
    }
}

impl TransportProvider for SystemTransport {
    fn dial<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Transport, RelayError>> {
        async move {
            match protocol {
                Protocol::Tcp => {
                    let stream =
                        TcpStream::connect(address)
                            .await
                            .map_err(|source| RelayError::Dial {
                                protocol,
                                address: address.to_string(),
                                source,
                            })?;
                    Ok(Transport::Stream(Box::new(stream)))
                }
                Protocol::Udp => Ok(Transport::Packet(Self::dial_udp(address).await?)),
            }
        }
        .boxed()
    }

    fn listen<'a>(
        &'a self,
        protocol: Protocol,
        address: &'a str,
    ) -> BoxFuture<'a, Result<Listener, RelayError>> {
        async move {
            let listen_error = |source| RelayError::Listen {
                protocol,
                address: address.to_string(),
                source,
            };
            match protocol {
                Protocol::Tcp => {
                    let listener = TcpListener::bind(address).await.map_err(listen_error)?;
                    Ok(Listener::Stream(Box::new(listener)))
                }
                Protocol::Udp => {
                    let socket = UdpSocket::bind(address).await.map_err(listen_error)?;
                    Ok(Listener::Packet(socket))
                }
            }
        }
        .boxed()
    }
}

impl StreamListener for TcpListener {
    fn accept(&self) -> BoxFuture<'_, io::Result<BoxedStream>> {
        async move {
            let (stream, addr) = TcpListener::accept(self).await?;
            debug!("Accepted TCP connection from {}", addr);
            Ok(Box::new(stream) as BoxedStream)
        }
        .boxed()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}
