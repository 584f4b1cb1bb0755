//! Per-stream I/O tasks
//!
//! A started stream is driven by three tasks:
//!
//! ```text
//! commands ──► driver ──► reader  (one read at a time)  ──► events
//!                    └──► writer  (one write at a time) ──► events
//! ```
//!
//! The driver forwards commands in issue order, so a `Write` issued
//! before `Stop` is still flushed before the stream is shut down. The
//! flush is bounded by [`CLOSE_GRACE`]; after that the writer is aborted
//! and the connection dropped.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::trace;

use crate::common::{Error, Frame, SessionId, Stream, MAX_FRAME_SIZE};

use super::stream::{EventKind, EventSender, Side, StreamEvent};

/// How long a stopped stream may spend flushing and shutting down
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub(crate) enum Command {
    Read,
    Write(Frame),
    Stop,
}

/// Sending side of a stream's command channel.
///
/// The receiver stays here until the stream is started, so commands issued
/// early are queued rather than lost.
pub(crate) struct Mailbox {
    tx: mpsc::UnboundedSender<Command>,
    rx: Option<mpsc::UnboundedReceiver<Command>>,
    stopped: bool,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            stopped: false,
        }
    }

    pub(crate) fn send(&mut self, command: Command) {
        if self.stopped {
            return;
        }
        // The driver is gone after a failure; the manager stops us next.
        let _ = self.tx.send(command);
    }

    pub(crate) fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<Command>> {
        if self.stopped {
            return None;
        }
        self.rx.take()
    }

    /// Returns false if the stream was already stopped.
    pub(crate) fn stop(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        let _ = self.tx.send(Command::Stop);
        self.stopped = true;
        self.rx = None;
        true
    }
}

/// Await `fut` while watching the command channel.
///
/// Returns `None` if the stream was stopped first. Other commands that
/// arrive meanwhile are kept in `backlog`, in order.
pub(crate) async fn establish<F, T>(
    fut: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    backlog: &mut VecDeque<Command>,
) -> Option<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(fut);

    loop {
        tokio::select! {
            out = &mut fut => return Some(out),
            cmd = commands.recv() => match cmd {
                Some(Command::Stop) | None => return None,
                Some(cmd) => backlog.push_back(cmd),
            }
        }
    }
}

/// Run an established stream until it is stopped
pub(crate) async fn drive(
    stream: Stream,
    id: SessionId,
    side: Side,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut backlog: VecDeque<Command>,
    events: EventSender,
) {
    let (reader, writer) = tokio::io::split(stream);
    let (read_tx, read_rx) = mpsc::unbounded_channel();
    let (write_tx, write_rx) = mpsc::unbounded_channel();

    let read_task = tokio::spawn(read_loop(reader, read_rx, id, side, events.clone()));
    let mut write_task = tokio::spawn(write_loop(writer, write_rx, id, side, events));

    loop {
        let command = match backlog.pop_front() {
            Some(command) => Some(command),
            None => commands.recv().await,
        };

        match command {
            Some(Command::Read) => {
                let _ = read_tx.send(());
            }
            Some(Command::Write(frame)) => {
                let _ = write_tx.send(frame);
            }
            Some(Command::Stop) | None => break,
        }
    }

    read_task.abort();
    drop(read_tx);
    drop(write_tx);

    if timeout(CLOSE_GRACE, &mut write_task).await.is_err() {
        trace!("[{}] {} stream flush timed out, dropping", id, side);
        write_task.abort();
        let _ = write_task.await;
    }
    let _ = read_task.await;

    trace!("[{}] {} stream closed", id, side);
}

async fn read_loop(
    mut reader: ReadHalf<Stream>,
    mut requests: mpsc::UnboundedReceiver<()>,
    id: SessionId,
    side: Side,
    events: EventSender,
) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    while requests.recv().await.is_some() {
        let kind = match reader.read(&mut buf).await {
            Ok(0) => EventKind::Failed(Error::ConnectionClosed),
            Ok(n) => EventKind::Read(Frame::copy_from_slice(&buf[..n])),
            Err(e) => EventKind::Failed(Error::Io(e)),
        };

        let failed = matches!(kind, EventKind::Failed(_));
        if events.send(StreamEvent::new(id, side, kind)).is_err() || failed {
            break;
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<Stream>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    id: SessionId,
    side: Side,
    events: EventSender,
) {
    while let Some(frame) = frames.recv().await {
        let result = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        let kind = match result {
            Ok(()) => EventKind::Written,
            Err(e) => EventKind::Failed(Error::Io(e)),
        };

        let failed = matches!(kind, EventKind::Failed(_));
        if events.send(StreamEvent::new(id, side, kind)).is_err() || failed {
            break;
        }
    }

    // TLS streams send close_notify here; the socket is closed on drop
    // whether or not this succeeds.
    match timeout(CLOSE_GRACE, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!("[{}] {} stream shutdown: {}", id, side, e),
        Err(_) => trace!("[{}] {} stream shutdown timed out", id, side),
    }
}
