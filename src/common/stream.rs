//! Stream abstraction
//!
//! Unified byte stream type handed between transport layers.
//! Plain TCP and TLS-wrapped TCP both end up as a `Stream`.

use tokio::io::{AsyncRead, AsyncWrite};

/// The core stream type used throughout the application.
pub type Stream = Box<dyn AsyncReadWrite + Unpin + Send>;

/// Combined trait for async read + write
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}
