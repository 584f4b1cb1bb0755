//! Proxy Protocol Layer
//!
//! Responsibilities:
//! - Handshake parsing (SOCKS5 greeting/request, HTTP request head)
//! - Target endpoint extraction
//! - Protocol replies (SOCKS5 status, HTTP 200/500)
//! - The relay phase shared by both protocols
//!
//! Each protocol is a set of [`State`]s driven by the stream manager.

pub mod http;
mod relay;
pub mod socks5;

pub use http::HttpProtocol;
pub use relay::DataTransfer;
pub use socks5::Socks5Protocol;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::session::State;

/// Proxy protocol spoken on the client-facing side
pub trait ProxyProtocol: Send + Sync {
    /// State every new session starts in
    fn initial_state(&self) -> Box<dyn State>;

    /// Get protocol name
    fn name(&self) -> &'static str;
}

/// Which protocol the listener serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Http,
    Socks5,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Http => write!(f, "http"),
            ProxyMode::Socks5 => write!(f, "socks5"),
        }
    }
}

impl FromStr for ProxyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(ProxyMode::Http),
            "socks5" => Ok(ProxyMode::Socks5),
            other => Err(Error::Config(format!(
                "Unknown proxy mode: {} (expected http or socks5)",
                other
            ))),
        }
    }
}

/// Create a protocol from the configured mode
pub fn create_protocol(mode: ProxyMode) -> Box<dyn ProxyProtocol> {
    match mode {
        ProxyMode::Http => Box::new(HttpProtocol),
        ProxyMode::Socks5 => Box::new(Socks5Protocol),
    }
}
