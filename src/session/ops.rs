//! Session-facing stream operations

use crate::common::{Frame, SessionId};

/// Operations a state may issue against the streams of a session.
///
/// Every call completes later with exactly one event for the same id;
/// callers must not issue a second read (or write) on a stream before the
/// previous one has completed.
pub trait StreamOps {
    fn read_server(&mut self, id: SessionId);

    fn write_server(&mut self, id: SessionId, frame: Frame);

    fn read_client(&mut self, id: SessionId);

    fn write_client(&mut self, id: SessionId, frame: Frame);

    /// Point the client stream at `host:service` and start connecting
    fn connect(&mut self, id: SessionId, host: &str, service: &str);

    /// Tear the session down. Idempotent.
    fn stop(&mut self, id: SessionId);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ReadServer(SessionId),
    WriteServer(SessionId, Frame),
    ReadClient(SessionId),
    WriteClient(SessionId, Frame),
    Connect(SessionId, String, String),
    Stop(SessionId),
}

impl Command {
    pub fn id(&self) -> SessionId {
        match self {
            Command::ReadServer(id)
            | Command::WriteServer(id, _)
            | Command::ReadClient(id)
            | Command::WriteClient(id, _)
            | Command::Connect(id, _, _)
            | Command::Stop(id) => *id,
        }
    }

    /// Carry the command out against `ops`
    pub fn apply(self, ops: &mut dyn StreamOps) {
        match self {
            Command::ReadServer(id) => ops.read_server(id),
            Command::WriteServer(id, frame) => ops.write_server(id, frame),
            Command::ReadClient(id) => ops.read_client(id),
            Command::WriteClient(id, frame) => ops.write_client(id, frame),
            Command::Connect(id, host, service) => ops.connect(id, &host, &service),
            Command::Stop(id) => ops.stop(id),
        }
    }
}

/// Records commands issued while a state handler runs.
///
/// The manager cannot hand out its registry while a session borrowed from
/// it is dispatching, so handlers queue here and the manager applies the
/// queue, in order, once the handler returns.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Vec<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Command> {
        self.commands.drain(..)
    }
}

impl StreamOps for CommandQueue {
    fn read_server(&mut self, id: SessionId) {
        self.commands.push(Command::ReadServer(id));
    }

    fn write_server(&mut self, id: SessionId, frame: Frame) {
        self.commands.push(Command::WriteServer(id, frame));
    }

    fn read_client(&mut self, id: SessionId) {
        self.commands.push(Command::ReadClient(id));
    }

    fn write_client(&mut self, id: SessionId, frame: Frame) {
        self.commands.push(Command::WriteClient(id, frame));
    }

    fn connect(&mut self, id: SessionId, host: &str, service: &str) {
        self.commands
            .push(Command::Connect(id, host.to_string(), service.to_string()));
    }

    fn stop(&mut self, id: SessionId) {
        self.commands.push(Command::Stop(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_keeps_issue_order() {
        let mut queue = CommandQueue::new();
        queue.write_server(3, Frame::from(b"\x05\x00".as_slice()));
        queue.read_client(3);
        queue.connect(3, "example.com", "443");
        queue.stop(3);

        assert_eq!(queue.len(), 4);
        assert!(queue.commands().iter().all(|c| c.id() == 3));

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(
            drained[2],
            Command::Connect(3, "example.com".into(), "443".into())
        );
        assert_eq!(drained[3], Command::Stop(3));
        assert!(queue.is_empty());
    }
}
