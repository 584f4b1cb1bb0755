//! Application Layer
//!
//! This module contains:
//! - StreamManager: session registry, event routing, session teardown
//! - ProxyServer: accept loop, session ids, shutdown

mod listener;
pub mod manager;

pub use listener::ProxyServer;
pub use manager::{ManagerHandle, StreamManager};
