//! Transport Layer
//!
//! Responsibilities:
//! - Establish connections (accept inbound, connect upstream)
//! - Wrap accepted connections (plain passthrough or TLS)
//! - Run the per-stream read/write tasks and report completions
//!
//! Nothing in this layer parses proxy protocols. Completions are delivered
//! as [`StreamEvent`]s to whoever owns the receiving end of the event
//! channel (the stream manager).

mod socket;
mod stream;
mod tcp;
mod tls;
mod worker;

pub use socket::{SocketClientStream, SocketServerStream, TransportConnector};
pub use stream::{
    event_channel, ClientStream, Connector, EventKind, EventReceiver, EventSender, ServerStream,
    Side, StreamEvent,
};
pub use tcp::TcpTransport;
pub use tls::{TlsLayer, TlsOptions};

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};

/// Transport trait for establishing raw connections
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote address
    async fn connect(&self, addr: &Address) -> Result<Stream>;

    /// Create a listener bound to an address
    async fn bind(&self, addr: &Address) -> Result<Box<dyn Listener>>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a new connection
    async fn accept(&self) -> Result<(Stream, SocketAddr)>;

    /// Get the local bound address
    fn local_addr(&self) -> Result<SocketAddr>;
}

/// Layer applied to every accepted connection before protocol traffic
#[async_trait]
pub trait StreamLayer: Send + Sync {
    /// Wrap an accepted stream (server-side handshake)
    async fn wrap_server(&self, stream: Stream) -> Result<Stream>;

    fn name(&self) -> &'static str;
}

/// Plain layer - accepted streams are ready immediately
pub struct PlainLayer;

#[async_trait]
impl StreamLayer for PlainLayer {
    async fn wrap_server(&self, stream: Stream) -> Result<Stream> {
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "plain"
    }
}
