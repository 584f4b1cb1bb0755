//! Stream roles and completion events
//!
//! A session owns two streams: the *server stream* faces the proxy client
//! that connected to us, the *client stream* faces the upstream target.
//! Every operation is asynchronous. `read`, `write` and `connect` each
//! complete with exactly one [`StreamEvent`] (or one `Failed` event),
//! posted to the event channel the stream was created with.

use std::fmt;

use tokio::sync::mpsc;

use crate::common::{Error, Frame, SessionId};

/// Which end of a session a stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Client-facing (accepted) stream
    Server,
    /// Upstream-facing (connected) stream
    Client,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Server => write!(f, "server"),
            Side::Client => write!(f, "client"),
        }
    }
}

/// Completion of one stream operation
#[derive(Debug)]
pub enum EventKind {
    /// Upstream connection established (client streams only)
    Connected,
    /// One read completed with a non-empty frame
    Read(Frame),
    /// One write completed in full
    Written,
    /// The operation failed, including orderly EOF on read
    Failed(Error),
}

/// Completion event routed back to the stream manager by session id
#[derive(Debug)]
pub struct StreamEvent {
    pub id: SessionId,
    pub side: Side,
    pub kind: EventKind,
}

impl StreamEvent {
    pub fn new(id: SessionId, side: Side, kind: EventKind) -> Self {
        Self { id, side, kind }
    }
}

pub type EventSender = mpsc::UnboundedSender<StreamEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<StreamEvent>;

/// Create the channel streams report their completions on
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Client-facing stream, created by the listener on accept
///
/// `start` performs any handshake and then issues the first read on its
/// own; there is no explicit completion for it.
pub trait ServerStream: Send {
    fn id(&self) -> SessionId;

    fn start(&mut self);

    /// Schedule one read of up to `MAX_FRAME_SIZE` bytes
    fn read(&mut self);

    /// Schedule one write of the whole frame
    fn write(&mut self, frame: Frame);

    /// Cancel pending operations and close. Idempotent.
    fn stop(&mut self);
}

/// Upstream-facing stream, created unconnected and paired with a server
/// stream by the manager
pub trait ClientStream: Send {
    fn id(&self) -> SessionId;

    /// Set the upstream target used by the next `start`
    fn set_endpoint(&mut self, host: String, service: String);

    /// Resolve and connect; completes with `Connected` or `Failed`
    fn start(&mut self);

    fn read(&mut self);

    fn write(&mut self, frame: Frame);

    fn stop(&mut self);
}

/// Factory for the client stream paired with each accepted server stream
pub trait Connector: Send {
    fn client_stream(&self, id: SessionId) -> Box<dyn ClientStream>;
}
