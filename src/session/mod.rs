//! Session Layer
//!
//! Responsibilities:
//! - Per-connection context (endpoint, pending reply, byte counters)
//! - Holding the active protocol state and forwarding events to it
//!
//! This layer does NOT touch sockets. States issue stream operations
//! through [`StreamOps`] and the stream manager carries them out.

mod ops;
mod state;

pub use ops::{Command, CommandQueue, StreamOps};
pub use state::{log_stream_error, State, Transition};

use tracing::trace;

use crate::common::{Error, Frame, SessionId};

/// Mutable data of one proxied connection
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    id: SessionId,
    response: Vec<u8>,
    host: String,
    service: String,
    bytes_to_remote: u64,
    bytes_to_local: u64,
}

impl SessionContext {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Pending protocol reply (or request to replay upstream)
    pub fn response(&self) -> &[u8] {
        &self.response
    }

    pub fn set_response(&mut self, response: impl Into<Vec<u8>>) {
        self.response = response.into();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Record the upstream target; set right before the connect is issued
    pub fn set_endpoint(&mut self, host: impl Into<String>, service: impl Into<String>) {
        self.host = host.into();
        self.service = service.into();
    }

    pub fn bytes_to_remote(&self) -> u64 {
        self.bytes_to_remote
    }

    pub fn bytes_to_local(&self) -> u64 {
        self.bytes_to_local
    }

    pub fn add_bytes_to_remote(&mut self, n: usize) {
        self.bytes_to_remote += n as u64;
    }

    pub fn add_bytes_to_local(&mut self, n: usize) {
        self.bytes_to_local += n as u64;
    }
}

/// A session: its context plus the one active state
pub struct Session {
    context: SessionContext,
    state: Box<dyn State>,
}

impl Session {
    pub fn new(id: SessionId, initial: Box<dyn State>) -> Self {
        Self {
            context: SessionContext::new(id),
            state: initial,
        }
    }

    pub fn id(&self) -> SessionId {
        self.context.id
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.context
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Install `state`, dropping the previous one
    pub fn change_state(&mut self, state: Box<dyn State>) {
        trace!(
            "[{}] state {} -> {}",
            self.context.id,
            self.state.name(),
            state.name()
        );
        self.state = state;
    }

    fn apply(&mut self, transition: Transition) {
        if let Some(next) = transition {
            self.change_state(next);
        }
    }

    pub fn handle_server_read(&mut self, ops: &mut dyn StreamOps, frame: Frame) {
        let t = self.state.handle_server_read(&mut self.context, ops, frame);
        self.apply(t);
    }

    pub fn handle_server_write(&mut self, ops: &mut dyn StreamOps) {
        let t = self.state.handle_server_write(&mut self.context, ops);
        self.apply(t);
    }

    pub fn handle_client_read(&mut self, ops: &mut dyn StreamOps, frame: Frame) {
        let t = self.state.handle_client_read(&mut self.context, ops, frame);
        self.apply(t);
    }

    pub fn handle_client_write(&mut self, ops: &mut dyn StreamOps) {
        let t = self.state.handle_client_write(&mut self.context, ops);
        self.apply(t);
    }

    pub fn handle_client_connect(&mut self, ops: &mut dyn StreamOps) {
        let t = self.state.handle_client_connect(&mut self.context, ops);
        self.apply(t);
    }

    pub fn handle_server_error(&mut self, ops: &mut dyn StreamOps, err: &Error) {
        let t = self.state.handle_server_error(&mut self.context, ops, err);
        self.apply(t);
    }

    pub fn handle_client_error(&mut self, ops: &mut dyn StreamOps, err: &Error) {
        let t = self.state.handle_client_error(&mut self.context, ops, err);
        self.apply(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl State for Idle {
        fn name(&self) -> &'static str {
            "idle"
        }

        fn handle_server_read(
            &self,
            ctx: &mut SessionContext,
            ops: &mut dyn StreamOps,
            frame: Frame,
        ) -> Transition {
            ctx.set_response(frame.to_vec());
            ops.read_server(ctx.id());
            Some(Box::new(Busy))
        }
    }

    struct Busy;

    impl State for Busy {
        fn name(&self) -> &'static str {
            "busy"
        }
    }

    #[test]
    fn test_session_forwards_to_state() {
        let mut session = Session::new(11, Box::new(Idle));
        let mut ops = CommandQueue::new();

        // Unhandled events are no-ops
        session.handle_client_connect(&mut ops);
        session.handle_server_write(&mut ops);
        assert!(ops.is_empty());
        assert_eq!(session.state_name(), "idle");

        session.handle_server_read(&mut ops, Frame::from(b"abc".as_slice()));
        assert_eq!(session.state_name(), "busy");
        assert_eq!(session.context().response(), b"abc");
        assert_eq!(ops.commands(), &[Command::ReadServer(11)]);
    }

    #[test]
    fn test_default_error_handlers_stop() {
        let mut session = Session::new(2, Box::new(Busy));
        let mut ops = CommandQueue::new();

        session.handle_server_error(&mut ops, &Error::ConnectionClosed);
        session.handle_client_error(&mut ops, &Error::Protocol("boom".into()));
        assert_eq!(ops.commands(), &[Command::Stop(2), Command::Stop(2)]);
        assert_eq!(session.state_name(), "busy");
    }

    #[test]
    fn test_context_counters() {
        let mut ctx = SessionContext::new(1);
        assert!(ctx.host().is_empty() && ctx.service().is_empty());
        ctx.set_endpoint("example.com", "443");
        ctx.add_bytes_to_remote(10);
        ctx.add_bytes_to_remote(5);
        ctx.add_bytes_to_local(7);
        assert_eq!((ctx.bytes_to_remote(), ctx.bytes_to_local()), (15, 7));
        assert_eq!((ctx.host(), ctx.service()), ("example.com", "443"));
    }
}
