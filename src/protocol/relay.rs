//! Data-transfer phase shared by every protocol
//!
//! Each direction alternates read and write: a frame read from one stream
//! is written to the other, and only once that write completes is the
//! source stream read again. This keeps at most one read and one write
//! outstanding per stream and one frame in flight per direction.

use crate::common::Frame;
use crate::session::{SessionContext, State, StreamOps, Transition};

pub struct DataTransfer;

impl State for DataTransfer {
    fn name(&self) -> &'static str {
        "data_transfer"
    }

    fn handle_server_read(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        frame: Frame,
    ) -> Transition {
        ctx.add_bytes_to_remote(frame.len());
        ops.write_client(ctx.id(), frame);
        None
    }

    fn handle_server_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        ops.read_client(ctx.id());
        None
    }

    fn handle_client_read(
        &self,
        ctx: &mut SessionContext,
        ops: &mut dyn StreamOps,
        frame: Frame,
    ) -> Transition {
        ctx.add_bytes_to_local(frame.len());
        ops.write_server(ctx.id(), frame);
        None
    }

    fn handle_client_write(&self, ctx: &mut SessionContext, ops: &mut dyn StreamOps) -> Transition {
        ops.read_server(ctx.id());
        None
    }
}
