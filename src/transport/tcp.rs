//! TCP Transport implementation

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tracing::debug;

use crate::common::{Address, Result, Stream};
use crate::error::Error;

use super::{Listener, Transport};

/// TCP transport - raw TCP connections
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }

    /// Resolve an address to every candidate endpoint, in resolver order
    async fn resolve(addr: &Address) -> Result<Vec<SocketAddr>> {
        match addr {
            Address::Socket(socket_addr) => Ok(vec![*socket_addr]),
            Address::Domain(domain, port) => {
                let addrs: Vec<SocketAddr> = lookup_host((domain.as_str(), *port))
                    .await
                    .map_err(|source| Error::Resolve {
                        host: domain.clone(),
                        source,
                    })?
                    .collect();

                if addrs.is_empty() {
                    return Err(Error::NoAddress(domain.clone()));
                }
                Ok(addrs)
            }
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let candidates = Self::resolve(addr).await?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    debug!("connected to {} ({})", addr, candidate);
                    // Disable Nagle's algorithm for lower latency
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(stream));
                }
                Err(e) => {
                    debug!("connect to {} ({}) failed: {}", addr, candidate, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => Error::Io(e),
            None => Error::NoAddress(addr.to_string()),
        })
    }

    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>> {
        let socket_addr = match addr {
            Address::Socket(s) => *s,
            Address::Domain(_, _) => {
                return Err(Error::Config("Cannot bind to domain address".into()));
            }
        };

        let listener = TcpListener::bind(socket_addr).await?;
        Ok(Box::new(TcpListenerWrapper { listener }))
    }
}

/// Wrapper for TcpListener to implement Listener trait
struct TcpListenerWrapper {
    listener: TcpListener,
}

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&self) -> Result<(Stream, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr))
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
