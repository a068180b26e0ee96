//! WebSocket signaling server
//!
//! Accept loop for the JSON-RPC 2.0 signaling protocol. Binding happens in
//! [`WebSocketSignalingServer::start`], which returns a handle exposing the
//! bound local address (useful with port 0) and a graceful shutdown path.

use super::handler::{handle_connection, SharedState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// WebSocket signaling server
pub struct WebSocketSignalingServer {
    /// Requested bind address
    addr: SocketAddr,

    /// Shared state
    state: Arc<SharedState>,
}

impl WebSocketSignalingServer {
    /// Create a new server over the given shared state
    pub fn new(addr: SocketAddr, state: Arc<SharedState>) -> Self {
        Self { addr, state }
    }

    /// Get shared state (for external access)
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Bind and start the accept loop
    ///
    /// Returns a handle that reports the bound address and can shut the
    /// server down.
    pub async fn start(self) -> Result<WebSocketServerHandle, std::io::Error> {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            error!("Failed to bind signaling server to {}: {}", self.addr, e);
            e
        })?;
        let local_addr = listener.local_addr()?;

        info!("Signaling server listening on ws://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted WebSocket connection from {}", peer_addr);
                                let state_clone = Arc::clone(&state);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, state_clone).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling server received shutdown signal");
                        break;
                    }
                }
            }

            info!("Signaling server accept loop exited");
        });

        Ok(WebSocketServerHandle {
            local_addr,
            task: Some(task),
            shutdown_tx,
        })
    }
}

/// Handle for controlling a running signaling server
pub struct WebSocketServerHandle {
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServerHandle {
    /// The address the server actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shut down the server and wait for the accept loop to exit
    pub async fn shutdown(mut self) {
        info!("Sending shutdown signal to signaling server");
        let _ = self.shutdown_tx.send(());

        if let Some(task) = self.task.take() {
            let _ = task.await;
            info!("Signaling server shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_reports_bound_address_and_shuts_down() {
        let state = Arc::new(SharedState::new());
        let server = WebSocketSignalingServer::new("127.0.0.1:0".parse().unwrap(), state);

        let handle = server.start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);

        handle.shutdown().await;
    }
}
