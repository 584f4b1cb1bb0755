//! amgi - SOCKS5 / HTTP CONNECT forwarding proxy
//!
//! # Architecture
//!
//! ```text
//! Listener (plain TCP or mutual TLS)
//! → StreamManager (session registry, one task)
//! → Session (context + active protocol state)
//! → State machine (SOCKS5 or HTTP, then shared data transfer)
//! → StreamOps (read / write / connect / stop)
//! → Transport streams (server side, client side)
//! ```
//!
//! ## Core Principles
//!
//! - Streams never call into sessions; they post completion events
//! - States hold no data; all of it lives in the session context
//! - At most one read and one write outstanding per stream
//! - Any stream error ends the whole session, exactly once
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, Frame, Address
//! ├── transport/       # TCP, TLS, per-stream I/O tasks
//! ├── session/         # Session context, State trait, StreamOps
//! ├── protocol/        # SOCKS5 and HTTP state machines
//! └── app/             # StreamManager, ProxyServer
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod session;
pub mod protocol;
pub mod app;

// Supporting modules
pub mod config;

// Re-exports for convenience
pub use common::{Address, Frame, SessionId, Stream};
pub use error::{Error, Result};
pub use config::ProxyConfig;

// Architecture re-exports
pub use app::{ProxyServer, StreamManager};
pub use protocol::{ProxyMode, ProxyProtocol};
pub use session::{Session, State};
pub use transport::Transport;
