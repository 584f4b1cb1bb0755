//! Protocol state interface

use tracing::warn;

use crate::common::{Error, Frame, SessionId};
use crate::transport::Side;

use super::{SessionContext, StreamOps};

/// Next state to install, if the handler wants a transition
pub type Transition = Option<Box<dyn State>>;

/// One phase of a protocol state machine.
///
/// States carry no data of their own; everything mutable lives in the
/// [`SessionContext`]. Events a state does not expect are ignored, except
/// errors, which log and stop the session unless overridden.
pub trait State: Send {
    fn name(&self) -> &'static str;

    fn handle_server_read(
        &self,
        _ctx: &mut SessionContext,
        _ops: &mut dyn StreamOps,
        _frame: Frame,
    ) -> Transition {
        None
    }

    fn handle_server_write(&self, _ctx: &mut SessionContext, _ops: &mut dyn StreamOps) -> Transition {
        None
    }

    fn handle_client_read(
        &self,
        _ctx: &mut SessionContext,
        _ops: &mut dyn StreamOps,
        _frame: Frame,
    ) -> Transition {
        None
    }

    fn handle_client_write(&self, _ctx: &mut SessionContext, _ops: &mut dyn StreamOps) -> Transition {
        None
    }

    fn handle_client_connect(
        &self,
        _ctx: &mut SessionContext,
        _ops: &mut dyn StreamOps,
    ) -> Transition {
        None
    }

    fn handle_server_error(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        err: &Error,
    ) -> Transition {
        log_stream_error(ctx.id(), Side::Server, err);
        ops.stop(ctx.id());
        None
    }

    fn handle_client_error(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        err: &Error,
    ) -> Transition {
        log_stream_error(ctx.id(), Side::Client, err);
        ops.stop(ctx.id());
        None
    }
}

/// Warn about a stream error unless it is an ordinary way to close
pub fn log_stream_error(id: SessionId, side: Side, err: &Error) {
    if !err.is_expected_close() {
        warn!("[{}] {} side session error: {}", id, side, err);
    }
}
