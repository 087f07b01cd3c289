//! Accept loop.
//!
//! Every accepted connection becomes a task in a `JoinSet`. Shutdown is
//! signalled over a `tokio::sync::watch` channel: the listener is dropped
//! first so no new connections are accepted, in-flight ones get the grace
//! period, and whatever is still running after that is aborted.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::handler::{handle_connection, ConnectionContext};
use super::{ConnectionObserver, NoopObserver, SocketServerConfig};
use crate::dispatch::Dispatcher;
use crate::ingest::VoteProcessor;

/// Back-off after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A bound, not yet running, Votifier socket server.
pub struct SocketServer {
    listener: TcpListener,
    processor: VoteProcessor,
    dispatcher: Dispatcher,
    config: SocketServerConfig,
    observer: Arc<dyn ConnectionObserver>,
}

impl SocketServer {
    /// Bind `config.bind`. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(
        config: SocketServerConfig,
        processor: VoteProcessor,
        dispatcher: Dispatcher,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        Ok(Self {
            listener,
            processor,
            dispatcher,
            config,
            observer: Arc::new(NoopObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConnectionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run on a background task.
    pub fn spawn(self) -> std::io::Result<SocketServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(SocketServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Accept until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            listener,
            processor,
            dispatcher,
            config,
            observer,
        } = self;
        let grace = config.shutdown_grace;
        let local = listener.local_addr().ok();
        let ctx = Arc::new(ConnectionContext {
            processor,
            dispatcher,
            config,
            observer,
        });

        info!(addr = ?local, "votifier socket server listening");
        let mut connections: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let ctx = Arc::clone(&ctx);
                        connections.spawn(async move {
                            handle_connection(stream, Some(remote), &ctx).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "socket accept error");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "socket connection task panicked");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        drop(listener);
        let in_flight = connections.len();
        debug!(in_flight, "socket server draining connections");

        let drained = tokio::time::timeout(grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                grace_secs = grace.as_secs(),
                "grace period elapsed; aborting socket connections"
            );
            connections.shutdown().await;
        }
        info!("votifier socket server stopped");
    }
}

/// Control handle for a spawned [`SocketServer`].
pub struct SocketServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SocketServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, drain and wait for the server task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "socket server task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Instant;

    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpStream;

    use super::*;
    use crate::ingest::ProtocolToggles;
    use crate::storage::MemoryVoteStore;
    use crate::test_support::test_key_store;
    use crate::wire::ServiceTokenTable;

    async fn start(grace: Duration) -> SocketServerHandle {
        let config = SocketServerConfig {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            shutdown_grace: grace,
            ..SocketServerConfig::default()
        };
        let processor = VoteProcessor::new(
            Arc::new(test_key_store()),
            Arc::new(ServiceTokenTable::new()),
            ProtocolToggles::default(),
        );
        let dispatcher = Dispatcher::new(Arc::new(MemoryVoteStore::new()));
        SocketServer::bind(config, processor, dispatcher)
            .await
            .unwrap()
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn greets_over_tcp() {
        let handle = start(Duration::from_secs(1)).await;
        let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("VOTIFIER 2 "), "{line:?}");
        assert!(line.ends_with('\n'));
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_refuses_new_connections() {
        let handle = start(Duration::from_secs(1)).await;
        let addr = handle.local_addr();
        handle.stop().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn stalled_connection_is_aborted_after_grace() {
        let handle = start(Duration::from_millis(200)).await;
        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut greeting = [0u8; 11];
        stream.read_exact(&mut greeting).await.unwrap();

        // The peer never sends anything; the 30 s read timeout would hold
        // the connection, so stopping must fall back to aborting it.
        let started = Instant::now();
        handle.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
    }
}
