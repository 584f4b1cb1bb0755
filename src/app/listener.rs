//! Listener - accepts client connections and feeds the stream manager

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, trace};

use crate::common::{Address, Result, SessionId};
use crate::config::ProxyConfig;
use crate::protocol::create_protocol;
use crate::transport::{
    event_channel, EventSender, Listener, PlainLayer, SocketServerStream, StreamLayer,
    TcpTransport, TlsLayer, Transport, TransportConnector,
};

use super::manager::{self, ManagerHandle, StreamManager};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// A bound proxy listener with its manager task
pub struct ProxyServer {
    listener: Box<dyn Listener>,
    layer: Arc<dyn StreamLayer>,
    events: EventSender,
    manager: ManagerHandle,
    manager_task: JoinHandle<()>,
    next_id: SessionId,
}

impl ProxyServer {
    /// Build the stack described by `config` and bind `0.0.0.0:port`
    pub async fn bind(config: &ProxyConfig) -> Result<Self> {
        config.validate()?;

        let layer: Arc<dyn StreamLayer> = match &config.tls {
            Some(options) => Arc::new(TlsLayer::new(options)?),
            None => Arc::new(PlainLayer),
        };

        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new());
        let listen = Address::Socket(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port));
        let listener = transport.bind(&listen).await?;

        let protocol = create_protocol(config.mode);
        let (events, events_rx) = event_channel();
        let connector = TransportConnector::new(transport, events.clone());

        info!(
            "{} proxy ({}) starts on port: {}",
            protocol.name(),
            layer.name(),
            listener.local_addr()?.port()
        );

        let (manager, manager_task) =
            manager::spawn(StreamManager::new(protocol, Box::new(connector)), events_rx);

        Ok(Self {
            listener,
            layer,
            events,
            manager,
            manager_task,
            next_id: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept until `shutdown` resolves, then stop every session
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, peer)) => {
                        self.next_id += 1;
                        let server = SocketServerStream::new(
                            self.next_id,
                            stream,
                            peer,
                            self.layer.clone(),
                            self.events.clone(),
                        );
                        if self.manager.accept(Box::new(server)).is_err() {
                            error!("stream manager is gone, stopping listener");
                            break;
                        }
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = &mut shutdown => {
                    info!("proxy server stopping ({} connections accepted)", self.next_id);
                    break;
                }
            }
        }

        drop(self.listener);
        self.manager.shutdown();
        let _ = self.manager_task.await;
        trace!("proxy server stopped");
        Ok(())
    }

    /// Accept until Ctrl-C or SIGTERM
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Error, Stream};
    use crate::protocol::ProxyMode;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    /// Listener whose every accept fails like an exhausted fd table
    struct FailingListener {
        accepts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Listener for FailingListener {
        async fn accept(&self) -> Result<(Stream, SocketAddr)> {
            self.accepts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Io(std::io::Error::from_raw_os_error(24)))
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_back_off() {
        let accepts = Arc::new(AtomicUsize::new(0));
        let (events, events_rx) = event_channel();
        let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new());
        let connector = TransportConnector::new(transport, events.clone());
        let (manager, manager_task) = manager::spawn(
            StreamManager::new(create_protocol(ProxyMode::Http), Box::new(connector)),
            events_rx,
        );

        let server = ProxyServer {
            listener: Box::new(FailingListener {
                accepts: accepts.clone(),
            }),
            layer: Arc::new(PlainLayer),
            events,
            manager,
            manager_task,
            next_id: 0,
        };

        server
            .run_until(tokio::time::sleep(Duration::from_secs(2)))
            .await
            .unwrap();

        let n = accepts.load(Ordering::SeqCst);
        assert!((1..=5).contains(&n), "{} accept attempts", n);
    }

    #[tokio::test]
    async fn test_accept_and_shutdown() {
        let config = ProxyConfig {
            port: 0,
            mode: ProxyMode::Http,
            ..Default::default()
        };
        let server = ProxyServer::bind(&config).await.unwrap();
        let port = server.local_addr().unwrap().port();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        // no Host: answered with 500 and closed
        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"HTTP/1.1 500"));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_incomplete_tls() {
        let config = ProxyConfig {
            port: 0,
            tls: Some(crate::transport::TlsOptions {
                private_key: "".into(),
                server_cert: "server.crt".into(),
                ca_cert: "ca.crt".into(),
            }),
            ..Default::default()
        };
        assert!(ProxyServer::bind(&config).await.is_err());
    }
}
