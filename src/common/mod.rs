//! Common types and abstractions
//!
//! This module defines the core types used throughout the application:
//! - Stream: unified async I/O abstraction
//! - Frame: bounded transfer unit between reads and writes
//! - Address: upstream target representation
//! - Error: unified error types

mod address;
mod frame;
mod stream;

pub use address::Address;
pub use frame::{Frame, MAX_FRAME_SIZE};
pub use stream::{AsyncReadWrite, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};

/// Identifier shared by a session and both of its streams.
///
/// Unique among the live sessions of one listener.
pub type SessionId = u64;
