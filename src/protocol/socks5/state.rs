//! SOCKS5 handshake states
//!
//! ```text
//! auth_request ─► connection_request ─► connection_established ─► ready_to_transfer ─► data_transfer
//! ```

use tracing::{info, warn};

use crate::common::{Error, Frame};
use crate::protocol::DataTransfer;
use crate::session::{SessionContext, State, StreamOps, Transition};

use super::{method_reply, ConnectRequest, Greeting, ReplyCode, AUTH_NONE, AUTH_NO_ACCEPTABLE};

/// Waiting for the client greeting
pub struct AuthRequest;

impl State for AuthRequest {
    fn name(&self) -> &'static str {
        "auth_request"
    }

    fn handle_server_read(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        frame: Frame,
    ) -> Transition {
        let method = match Greeting::decode(&frame) {
            Ok(greeting) if greeting.offers(AUTH_NONE) => AUTH_NONE,
            Ok(_) => {
                warn!("[{}] socks5 protocol: no acceptable auth method", ctx.id());
                AUTH_NO_ACCEPTABLE
            }
            Err(e) => {
                warn!("[{}] {}", ctx.id(), e);
                AUTH_NO_ACCEPTABLE
            }
        };

        ctx.set_response(method_reply(method));
        ops.write_server(ctx.id(), Frame::from(ctx.response().to_vec()));
        Some(Box::new(ConnectionRequest))
    }
}

/// Method selected, waiting for the CONNECT request
pub struct ConnectionRequest;

impl State for ConnectionRequest {
    fn name(&self) -> &'static str {
        "connection_request"
    }

    fn handle_server_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        if ctx.response() == method_reply(AUTH_NO_ACCEPTABLE) {
            ops.stop(ctx.id());
        } else {
            ops.read_server(ctx.id());
        }
        None
    }

    fn handle_server_read(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        frame: Frame,
    ) -> Transition {
        let request = match ConnectRequest::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("[{}] socks5 protocol: {}", ctx.id(), e);
                ops.stop(ctx.id());
                return None;
            }
        };

        let host = request.address.host();
        let service = request.address.service();
        info!("[{}] requested [{}:{}]", ctx.id(), host, service);

        ctx.set_endpoint(host, service);
        ctx.set_response(frame.to_vec());
        ops.connect(ctx.id(), ctx.host(), ctx.service());
        Some(Box::new(ConnectionEstablished))
    }
}

/// Upstream connect in flight; the raw request is kept as the reply template
pub struct ConnectionEstablished;

impl ConnectionEstablished {
    fn reply(ctx: &SessionContext, code: ReplyCode) -> Option<Frame> {
        ConnectRequest::decode(ctx.response())
            .ok()
            .map(|request| Frame::from(request.reply(code)))
    }
}

impl State for ConnectionEstablished {
    fn name(&self) -> &'static str {
        "connection_established"
    }

    fn handle_client_connect(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
    ) -> Transition {
        match Self::reply(ctx, ReplyCode::Succeeded) {
            Some(reply) => {
                ops.write_server(ctx.id(), reply);
                Some(Box::new(ReadyToTransfer))
            }
            None => {
                ops.stop(ctx.id());
                None
            }
        }
    }

    fn handle_client_error(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        err: &Error,
    ) -> Transition {
        warn!("[{}] client side session error: {}", ctx.id(), err);

        // The session ends once this reply has been written
        match Self::reply(ctx, ReplyCode::from_error(err)) {
            Some(reply) => ops.write_server(ctx.id(), reply),
            None => ops.stop(ctx.id()),
        }
        None
    }

    fn handle_server_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        ops.stop(ctx.id());
        None
    }
}

/// Success reply in flight
pub struct ReadyToTransfer;

impl State for ReadyToTransfer {
    fn name(&self) -> &'static str {
        "ready_to_transfer"
    }

    fn handle_server_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        ops.read_server(ctx.id());
        ops.read_client(ctx.id());
        Some(Box::new(DataTransfer))
    }
}
