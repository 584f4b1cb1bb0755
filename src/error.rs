//! Error types for amgi

use std::io::ErrorKind;

use thiserror::Error;

/// Main error type for amgi
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No address found for {0}")]
    NoAddress(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is an ordinary way for a connection to end.
    ///
    /// Quiet errors still terminate the session, they are just not
    /// reported as warnings.
    pub fn is_expected_close(&self) -> bool {
        match self {
            Error::ConnectionClosed | Error::Cancelled => true,
            Error::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::TimedOut
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type alias for amgi
pub type Result<T> = std::result::Result<T, Error>;
