//! Stream manager - the session registry and event router
//!
//! The manager owns every live session together with its two streams.
//! Stream completions arrive as [`StreamEvent`]s and are routed by session
//! id to the session's active state; the stream operations the state
//! issues are then carried out in order. An event whose session is gone
//! (already stopped) is dropped.
//!
//! Run as an actor ([`spawn`]), one task owns the registry, so no session
//! is ever touched from two places at once.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::common::{Error, Frame, Result, SessionId};
use crate::protocol::ProxyProtocol;
use crate::session::{CommandQueue, Session, StreamOps};
use crate::transport::{
    ClientStream, Connector, EventKind, EventReceiver, ServerStream, Side, StreamEvent,
};

struct SessionEntry {
    server: Box<dyn ServerStream>,
    client: Box<dyn ClientStream>,
    session: Session,
}

pub struct StreamManager {
    protocol: Box<dyn ProxyProtocol>,
    connector: Box<dyn Connector>,
    sessions: HashMap<SessionId, SessionEntry>,
}

impl StreamManager {
    pub fn new(protocol: Box<dyn ProxyProtocol>, connector: Box<dyn Connector>) -> Self {
        Self {
            protocol,
            connector,
            sessions: HashMap::new(),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Name of the state a session is in
    pub fn state_name(&self, id: SessionId) -> Option<&'static str> {
        self.sessions.get(&id).map(|entry| entry.session.state_name())
    }

    /// Register a freshly accepted server stream and start it
    pub fn on_accept(&mut self, mut server: Box<dyn ServerStream>) {
        let id = server.id();
        if self.sessions.contains_key(&id) {
            warn!("[{}] session id already in use, dropping connection", id);
            server.stop();
            return;
        }

        let client = self.connector.client_stream(id);
        let session = Session::new(id, self.protocol.initial_state());

        server.start();
        self.sessions.insert(
            id,
            SessionEntry {
                server,
                client,
                session,
            },
        );
        trace!(
            "[{}] {} session created, live sessions {}",
            id,
            self.protocol.name(),
            self.sessions.len()
        );
    }

    /// Route one stream completion to its session
    pub fn dispatch(&mut self, event: StreamEvent) {
        let StreamEvent { id, side, kind } = event;
        match kind {
            EventKind::Read(frame) => self.on_read(id, side, frame),
            EventKind::Written => self.on_write(id, side),
            EventKind::Connected => self.on_connect(id),
            EventKind::Failed(err) => self.on_error(id, side, err),
        }
    }

    pub fn on_read(&mut self, id: SessionId, side: Side, frame: Frame) {
        self.with_session(id, |session, ops| match side {
            Side::Server => session.handle_server_read(ops, frame),
            Side::Client => session.handle_client_read(ops, frame),
        });
    }

    pub fn on_write(&mut self, id: SessionId, side: Side) {
        self.with_session(id, |session, ops| match side {
            Side::Server => session.handle_server_write(ops),
            Side::Client => session.handle_client_write(ops),
        });
    }

    pub fn on_connect(&mut self, id: SessionId) {
        self.with_session(id, |session, ops| session.handle_client_connect(ops));
    }

    pub fn on_error(&mut self, id: SessionId, side: Side, err: Error) {
        self.with_session(id, |session, ops| match side {
            Side::Server => session.handle_server_error(ops, &err),
            Side::Client => session.handle_client_error(ops, &err),
        });
    }

    fn with_session<F>(&mut self, id: SessionId, f: F)
    where
        F: FnOnce(&mut Session, &mut dyn StreamOps),
    {
        let Some(entry) = self.sessions.get_mut(&id) else {
            trace!("[{}] event for closed session dropped", id);
            return;
        };

        let mut queue = CommandQueue::new();
        f(&mut entry.session, &mut queue);

        for command in queue.drain() {
            command.apply(&mut *self);
        }
    }

    /// Stop every live session
    pub fn stop_all(&mut self) {
        if self.sessions.is_empty() {
            return;
        }
        info!("stopping {} live sessions", self.sessions.len());

        let ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in ids {
            self.stop(id);
        }
    }
}

impl StreamOps for StreamManager {
    fn read_server(&mut self, id: SessionId) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.server.read();
        }
    }

    fn write_server(&mut self, id: SessionId, frame: Frame) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.server.write(frame);
        }
    }

    fn read_client(&mut self, id: SessionId) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.client.read();
        }
    }

    fn write_client(&mut self, id: SessionId, frame: Frame) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.client.write(frame);
        }
    }

    fn connect(&mut self, id: SessionId, host: &str, service: &str) {
        if let Some(entry) = self.sessions.get_mut(&id) {
            entry.client.set_endpoint(host.to_string(), service.to_string());
            entry.client.start();
        }
    }

    fn stop(&mut self, id: SessionId) {
        let Some(mut entry) = self.sessions.remove(&id) else {
            return;
        };

        entry.server.stop();
        entry.client.stop();

        let ctx = entry.session.context();
        info!(
            "[{}] session closed: [{}:{}] tx_bytes: {}, rx_bytes: {}, live sessions {}",
            id,
            ctx.host(),
            ctx.service(),
            format_bytes(ctx.bytes_to_remote()),
            format_bytes(ctx.bytes_to_local()),
            self.sessions.len()
        );
    }
}

/// Requests from the listener to the manager task
pub enum Control {
    Accept(Box<dyn ServerStream>),
    Shutdown,
}

/// Cloneable handle to a running manager task
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl ManagerHandle {
    /// Hand an accepted stream over to the manager
    pub fn accept(&self, stream: Box<dyn ServerStream>) -> Result<()> {
        self.tx
            .send(Control::Accept(stream))
            .map_err(|_| Error::Cancelled)
    }

    /// Stop every session and end the manager task
    pub fn shutdown(&self) {
        let _ = self.tx.send(Control::Shutdown);
    }
}

/// Run `manager` on its own task, fed by `events`
pub fn spawn(manager: StreamManager, events: EventReceiver) -> (ManagerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(manager.run(rx, events));
    (ManagerHandle { tx }, task)
}

impl StreamManager {
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>, mut events: EventReceiver) {
        debug!("{} stream manager started", self.protocol.name());

        loop {
            tokio::select! {
                biased;

                ctl = control.recv() => match ctl {
                    Some(Control::Accept(stream)) => self.on_accept(stream),
                    Some(Control::Shutdown) | None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }

        self.stop_all();
        debug!("{} stream manager stopped", self.protocol.name());
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
