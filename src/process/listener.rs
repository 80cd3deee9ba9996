//! TCP listeners for the ports claimed during startup.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::{ExecutionProcess, PortBinding};
use crate::error::{ApirateError, Result, TransportError};
use crate::module::Client;
use crate::transport::{ConnectionDescriptor, SocketFactory};

const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Binds one listener per claimed port and feeds accepted connections into
/// connection pipelines.
pub struct ListenerService {
    process: Arc<ExecutionProcess>,
    host: String,
    shutdown_grace: Duration,
}

impl ListenerService {
    pub fn new(process: Arc<ExecutionProcess>, host: impl Into<String>) -> Self {
        Self {
            process,
            host: host.into(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// How long open connections get to finish once shutdown is requested.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub async fn bind(self) -> Result<RunningListeners> {
        if !self.process.is_started() {
            return Err(ApirateError::NotStarted);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut addrs = BTreeMap::new();
        let mut tasks = Vec::new();

        for binding in self.process.bindings().iter() {
            let listener = match TcpListener::bind((self.host.as_str(), binding.port)).await {
                Ok(listener) => listener,
                Err(e) => {
                    // Stop the loops already running before reporting.
                    let _ = shutdown_tx.send(());
                    return Err(TransportError::BindFailed {
                        port: binding.port,
                        reason: e.to_string(),
                    }
                    .into());
                }
            };
            let local_addr = listener.local_addr()?;

            info!(
                port = binding.port,
                address = %local_addr,
                module = %binding.owner,
                protocol = %binding.factory.protocol(),
                "Listening"
            );

            addrs.insert(binding.port, local_addr);
            let accept = AcceptLoop {
                process: self.process.clone(),
                binding: binding.clone(),
                listener,
                shutdown: shutdown_tx.subscribe(),
                grace: self.shutdown_grace,
            };
            tasks.push(tokio::spawn(accept.run()));
        }

        if addrs.is_empty() {
            warn!("No module claimed a port, nothing to listen on");
        }

        Ok(RunningListeners {
            process: self.process,
            addrs,
            shutdown_tx,
            tasks,
        })
    }
}

/// Handle on the bound listeners.
pub struct RunningListeners {
    process: Arc<ExecutionProcess>,
    addrs: BTreeMap<u16, SocketAddr>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningListeners {
    /// Address actually bound for a claimed port. Differs from the claim when
    /// the module asked for port 0.
    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.addrs.get(&port).copied()
    }

    pub fn addrs(&self) -> impl Iterator<Item = (u16, SocketAddr)> + '_ {
        self.addrs.iter().map(|(port, addr)| (*port, *addr))
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Stop accepting, close open connections and wait for every loop.
    pub async fn shutdown(self) {
        self.process.shutdown();
        let _ = self.shutdown_tx.send(());

        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!("Listener task failed: {}", e);
            }
        }
        info!("All listeners stopped");
    }
}

struct AcceptLoop {
    process: Arc<ExecutionProcess>,
    binding: PortBinding,
    listener: TcpListener,
    shutdown: broadcast::Receiver<()>,
    grace: Duration,
}

impl AcceptLoop {
    async fn run(mut self) {
        let port = self.binding.port;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        connections.spawn(serve_connection(
                            self.process.clone(),
                            self.binding.factory.clone(),
                            stream,
                            peer,
                            port,
                            self.shutdown.resubscribe(),
                        ));
                    }
                    Err(e) => {
                        warn!(port, "Accept failed: {}", e);
                        self.process.metrics().record_connection_error();
                    }
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        debug!(port, open = connections.len(), "Accept loop stopping");
        let drained = tokio::time::timeout(self.grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(port, "Connections still open after grace period, aborting them");
            connections.abort_all();
        }
    }
}

async fn serve_connection(
    process: Arc<ExecutionProcess>,
    factory: Arc<dyn SocketFactory>,
    stream: TcpStream,
    peer: SocketAddr,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) {
    let client = Client::new(peer, port);
    let span = info_span!(
        "connection",
        peer = %peer,
        port,
        connection = %client.connection_id
    );

    async move {
        let mut socket = factory.build(ConnectionDescriptor::new(stream, peer, port));
        let mut pipeline = match process.open_connection(client) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!("Refusing connection: {}", e);
                let _ = socket.close().await;
                return;
            }
        };
        debug!(instances = pipeline.len(), "Connection accepted");

        loop {
            let read = tokio::select! {
                _ = shutdown.recv() => break,
                read = socket.read_query() => read,
            };

            match read {
                Ok(Some(query)) => match pipeline.dispatch(query).await {
                    Ok(response) => {
                        if let Err(e) = socket.write_response(&response).await {
                            warn!("Write failed: {}", e);
                            process.metrics().record_connection_error();
                            break;
                        }
                    }
                    // Already logged by the pipeline; the connection stays up.
                    Err(_) => continue,
                },
                Ok(None) => {
                    debug!("Peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!("Read failed: {}", e);
                    process.metrics().record_connection_error();
                    break;
                }
            }
        }

        if let Err(e) = socket.close().await {
            debug!("Socket close failed: {}", e);
        }
        pipeline.close();
    }
    .instrument(span)
    .await
}
