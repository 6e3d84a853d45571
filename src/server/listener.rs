//! RTMP server listener
//!
//! Handles the TCP accept loop and spawns one task per connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::error::Result;
use crate::registry::{StreamIdAllocator, StreamRegistry};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::session::SharedServices;
use crate::storage::ApplicationResolver;

/// RTMP server
pub struct RtmpServer {
    config: ServerConfig,
    shared: SharedServices,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl RtmpServer {
    /// Create a server whose applications come from `resolver`
    pub fn new(config: ServerConfig, resolver: Arc<dyn ApplicationResolver>) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(StreamRegistry::new());
        let stream_ids = Arc::new(StreamIdAllocator::new(config.stream_id_capacity));
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Ok(Self {
            shared: SharedServices::new(registry, stream_ids, resolver),
            config,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        })
    }

    /// Registry shared by every connection of this server
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.shared.registry
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails to bind.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "RTMP server listening");
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "RTMP server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "RTMP server listening");
        self.accept_loop(&listener).await
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(session_id = session_id, error = %e, "Failed to configure socket");
                return;
            }
        }

        let connection = Connection::new(
            session_id,
            socket,
            Some(peer_addr),
            self.config.clone(),
            self.shared.clone(),
        );

        tokio::spawn(async move {
            // released when the connection ends
            let _permit = permit;
            if let Err(e) = connection.run().await {
                tracing::debug!(session_id = session_id, error = %e, "Connection error");
            }
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}
