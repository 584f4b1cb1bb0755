//! Socket-backed server and client streams

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, trace};

use crate::common::{Address, Frame, SessionId, Stream};

use super::stream::{
    ClientStream, Connector, EventKind, EventSender, ServerStream, Side, StreamEvent,
};
use super::worker::{drive, establish, Command, Mailbox};
use super::{StreamLayer, Transport};

/// Accepted connection, plain or TLS depending on its layer
pub struct SocketServerStream {
    id: SessionId,
    peer: SocketAddr,
    stream: Option<Stream>,
    layer: Arc<dyn StreamLayer>,
    events: EventSender,
    mailbox: Mailbox,
}

impl SocketServerStream {
    pub fn new(
        id: SessionId,
        stream: Stream,
        peer: SocketAddr,
        layer: Arc<dyn StreamLayer>,
        events: EventSender,
    ) -> Self {
        Self {
            id,
            peer,
            stream: Some(stream),
            layer,
            events,
            mailbox: Mailbox::new(),
        }
    }
}

impl ServerStream for SocketServerStream {
    fn id(&self) -> SessionId {
        self.id
    }

    fn start(&mut self) {
        let (Some(stream), Some(mut commands)) = (self.stream.take(), self.mailbox.take_receiver())
        else {
            return;
        };

        let id = self.id;
        let layer = self.layer.clone();
        let events = self.events.clone();
        debug!(
            "[{}] incoming connection from proxy client: [{}] ({})",
            id,
            self.peer,
            layer.name()
        );

        tokio::spawn(async move {
            let mut backlog = VecDeque::new();
            let stream = match establish(layer.wrap_server(stream), &mut commands, &mut backlog).await {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    let _ = events.send(StreamEvent::new(id, Side::Server, EventKind::Failed(e)));
                    return;
                }
                None => return,
            };

            // Ready for protocol traffic: the first read is implicit
            backlog.push_front(Command::Read);
            drive(stream, id, Side::Server, commands, backlog, events).await;
        });
    }

    fn read(&mut self) {
        self.mailbox.send(Command::Read);
    }

    fn write(&mut self, frame: Frame) {
        self.mailbox.send(Command::Write(frame));
    }

    fn stop(&mut self) {
        if self.mailbox.stop() {
            trace!("[{}] server stream stopping", self.id);
        }
        self.stream = None;
    }
}

/// Upstream connection, established on `start`
pub struct SocketClientStream {
    id: SessionId,
    host: String,
    service: String,
    transport: Arc<dyn Transport>,
    events: EventSender,
    mailbox: Mailbox,
}

impl SocketClientStream {
    pub fn new(id: SessionId, transport: Arc<dyn Transport>, events: EventSender) -> Self {
        Self {
            id,
            host: String::new(),
            service: String::new(),
            transport,
            events,
            mailbox: Mailbox::new(),
        }
    }
}

impl ClientStream for SocketClientStream {
    fn id(&self) -> SessionId {
        self.id
    }

    fn set_endpoint(&mut self, host: String, service: String) {
        self.host = host;
        self.service = service;
    }

    fn start(&mut self) {
        let Some(mut commands) = self.mailbox.take_receiver() else {
            return;
        };

        let id = self.id;
        let host = self.host.clone();
        let service = self.service.clone();
        let transport = self.transport.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let connect = async {
                let addr = Address::from_host_service(&host, &service)?;
                transport.connect(&addr).await
            };

            let mut backlog = VecDeque::new();
            let stream = match establish(connect, &mut commands, &mut backlog).await {
                Some(Ok(stream)) => stream,
                Some(Err(e)) => {
                    let _ = events.send(StreamEvent::new(id, Side::Client, EventKind::Failed(e)));
                    return;
                }
                None => return,
            };

            info!("[{}] connected to [{}:{}]", id, host, service);
            if events
                .send(StreamEvent::new(id, Side::Client, EventKind::Connected))
                .is_err()
            {
                return;
            }

            drive(stream, id, Side::Client, commands, backlog, events).await;
        });
    }

    fn read(&mut self) {
        self.mailbox.send(Command::Read);
    }

    fn write(&mut self, frame: Frame) {
        self.mailbox.send(Command::Write(frame));
    }

    fn stop(&mut self) {
        if self.mailbox.stop() {
            trace!(
                "[{}] client stream stopping ({}:{})",
                self.id,
                self.host,
                self.service
            );
        }
    }
}

/// Creates socket client streams over a shared transport
pub struct TransportConnector {
    transport: Arc<dyn Transport>,
    events: EventSender,
}

impl TransportConnector {
    pub fn new(transport: Arc<dyn Transport>, events: EventSender) -> Self {
        Self { transport, events }
    }
}

impl Connector for TransportConnector {
    fn client_stream(&self, id: SessionId) -> Box<dyn ClientStream> {
        Box::new(SocketClientStream::new(
            id,
            self.transport.clone(),
            self.events.clone(),
        ))
    }
}
