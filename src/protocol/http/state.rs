//! HTTP proxy states

use tracing::{info, warn};

use crate::common::Frame;
use crate::protocol::DataTransfer;
use crate::session::{SessionContext, State, StreamOps, Transition};

use super::{RequestHead, HTTP_200, HTTP_500};

fn reject(ctx: &SessionContext, ops: &mut dyn StreamOps) -> Transition {
    ops.write_server(ctx.id(), Frame::from(HTTP_500.as_bytes()));
    ops.stop(ctx.id());
    None
}

/// Waiting for the first request
pub struct WaitRequest;

impl State for WaitRequest {
    fn name(&self) -> &'static str {
        "wait_request"
    }

    fn handle_server_read(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        frame: Frame,
    ) -> Transition {
        let head = match RequestHead::parse(&frame) {
            Ok(head) => head,
            Err(e) => {
                warn!("[{}] http protocol: bad request packet: {}", ctx.id(), e);
                return reject(ctx, ops);
            }
        };

        let host = head.get_host();
        let service = head.get_service();

        if host.is_empty() {
            warn!("[{}] http protocol: bad request packet", ctx.id());
            return reject(ctx, ops);
        }
        if service.is_empty() {
            warn!("[{}] http protocol: bad remote address format", ctx.id());
            return reject(ctx, ops);
        }

        if head.is_connect() {
            ctx.set_response(HTTP_200.as_bytes());
        } else {
            ctx.set_response(frame.to_vec());
        }

        info!("[{}] requested [{}:{}]", ctx.id(), host, service);
        ctx.set_endpoint(host, service);
        ops.connect(ctx.id(), ctx.host(), ctx.service());
        Some(Box::new(ConnectionEstablished))
    }
}

/// Upstream connect in flight
pub struct ConnectionEstablished;

impl State for ConnectionEstablished {
    fn name(&self) -> &'static str {
        "connection_established"
    }

    fn handle_client_connect(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
    ) -> Transition {
        let pending = Frame::from(ctx.response().to_vec());
        if ctx.response() == HTTP_200.as_bytes() {
            // tunnel acknowledged to the client
            ops.write_server(ctx.id(), pending);
        } else {
            // plain request replayed upstream
            ops.write_client(ctx.id(), pending);
        }
        Some(Box::new(ReadyToTransfer))
    }
}

/// Tunnel ack or replayed request in flight
pub struct ReadyToTransfer;

impl ReadyToTransfer {
    fn start_relay(ctx: &SessionContext, ops: &mut dyn StreamOps) -> Transition {
        ops.read_server(ctx.id());
        ops.read_client(ctx.id());
        Some(Box::new(DataTransfer))
    }
}

impl State for ReadyToTransfer {
    fn name(&self) -> &'static str {
        "ready_to_transfer"
    }

    fn handle_server_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        Self::start_relay(ctx, ops)
    }

    fn handle_client_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        Self::start_relay(ctx, ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::session::{Command, CommandQueue, Session};

    #[test]
    fn test_connect_tunnel() {
        let mut session = Session::new(1, Box::new(WaitRequest));
        let mut ops = CommandQueue::new();

        session.handle_server_read(
            &mut ops,
            Frame::from(b"CONNECT example.com:443 HTTP/1.1\r\n\r\n".as_slice()),
        );
        assert_eq!(
            ops.commands(),
            &[Command::Connect(1, "example.com".into(), "443".into())]
        );
        assert_eq!(session.state_name(), "connection_established");

        ops.clear();
        session.handle_client_connect(&mut ops);
        assert_eq!(
            ops.commands(),
            &[Command::WriteServer(1, Frame::from(HTTP_200.as_bytes()))]
        );

        ops.clear();
        session.handle_server_write(&mut ops);
        assert_eq!(
            ops.commands(),
            &[Command::ReadServer(1), Command::ReadClient(1)]
        );
        assert_eq!(session.state_name(), "data_transfer");
    }

    #[test]
    fn test_plain_request_replayed_upstream() {
        let request: &'static [u8] = b"GET /a HTTP/1.1\r\nHost: example.com:8080\r\n\r\n";
        let mut session = Session::new(2, Box::new(WaitRequest));
        let mut ops = CommandQueue::new();

        session.handle_server_read(&mut ops, Frame::from(request));
        assert_eq!(
            ops.commands(),
            &[Command::Connect(2, "example.com".into(), "8080".into())]
        );

        ops.clear();
        session.handle_client_connect(&mut ops);
        assert_eq!(ops.commands(), &[Command::WriteClient(2, Frame::from(request))]);

        ops.clear();
        session.handle_client_write(&mut ops);
        assert_eq!(
            ops.commands(),
            &[Command::ReadServer(2), Command::ReadClient(2)]
        );
        assert_eq!(session.state_name(), "data_transfer");
    }

    #[test]
    fn test_missing_host_rejected() {
        for request in [
            &b"GET / HTTP/1.1\r\n\r\n"[..],
            &b"CONNECT example.com HTTP/1.1\r\n\r\n"[..],
            &b"garbage\r\n\r\n"[..],
        ] {
            let mut session = Session::new(3, Box::new(WaitRequest));
            let mut ops = CommandQueue::new();

            session.handle_server_read(&mut ops, Frame::copy_from_slice(request));
            assert_eq!(
                ops.commands(),
                &[
                    Command::WriteServer(3, Frame::from(HTTP_500.as_bytes())),
                    Command::Stop(3)
                ]
            );
            assert_eq!(session.state_name(), "wait_request");
            assert!(session.context().host().is_empty());
        }
    }

    #[test]
    fn test_connect_failure_stops() {
        let mut session = Session::new(4, Box::new(ConnectionEstablished));
        let mut ops = CommandQueue::new();
        session.handle_client_error(
            &mut ops,
            &Error::Io(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)),
        );
        assert_eq!(ops.commands(), &[Command::Stop(4)]);
    }
}
