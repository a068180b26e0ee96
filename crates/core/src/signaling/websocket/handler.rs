//! WebSocket connection handler for JSON-RPC 2.0 signaling
//!
//! Handles individual WebSocket connections: binds the connection to a
//! client or admin identity on its first registration message, relays
//! session SDP/ICE traffic between endpoints, queues traffic aimed at
//! offline clients, and cleans up liveness state on disconnect.

use crate::registry::{ClientRegistry, InMemoryAdminDirectory, InMemoryRequestQueue};
use crate::signaling::protocol::{
    error_codes, AdminRegisterParams, ClientDisconnectParams, ClientRegisterParams,
    IceCandidateParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, SessionSdpParams,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    accept_async,
    tungstenite::{Message, Result as WsResult},
};
use tracing::{debug, info, warn};

/// Shared state across all WebSocket connections
pub struct SharedState {
    /// Client registry (liveness + affiliation bookkeeping)
    pub registry: Arc<ClientRegistry>,

    /// Admin directory; the handler attaches/detaches admin transports here
    pub directory: Arc<InMemoryAdminDirectory>,

    /// Queue for traffic aimed at offline clients
    pub relay: Arc<InMemoryRequestQueue>,
}

impl SharedState {
    /// Create shared state wiring a fresh registry over fresh collaborators
    pub fn new() -> Self {
        let directory = Arc::new(InMemoryAdminDirectory::new());
        let relay = Arc::new(InMemoryRequestQueue::new());
        let registry = Arc::new(ClientRegistry::new(
            Arc::clone(&directory) as Arc<dyn crate::registry::AdminDirectory>,
            Arc::clone(&relay) as Arc<dyn crate::registry::QueuedRequestRelay>,
        ));
        Self {
            registry,
            directory,
            relay,
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity a connection has bound to via its registration message
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnectionRole {
    Unbound,
    Client(String),
    Admin(String),
}

impl ConnectionRole {
    fn endpoint_id(&self) -> Option<&str> {
        match self {
            ConnectionRole::Unbound => None,
            ConnectionRole::Client(id) | ConnectionRole::Admin(id) => Some(id),
        }
    }
}

/// Handle a single WebSocket connection
pub async fn handle_connection(stream: TcpStream, state: Arc<SharedState>) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    info!("New WebSocket connection from: {}", addr);

    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Channel for sending messages back to this connection
    let (tx, mut rx) = mpsc::channel::<String>(128);

    // Task to forward messages from channel to WebSocket
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(msg)).await {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let mut role = ConnectionRole::Unbound;

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Err(e) = handle_message(&text, &state, &mut role, &tx).await {
                    warn!("Error handling message from {}: {}", addr, e);
                    let error_response = JsonRpcError::new(
                        error_codes::INTERNAL_ERROR,
                        e.to_string(),
                        json!(null),
                    );
                    if let Ok(json) = error_response.to_json() {
                        let _ = tx.send(json).await;
                    }
                }
            }
            Ok(Message::Close(_)) => {
                info!("WebSocket connection closed by peer: {}", addr);
                break;
            }
            Ok(Message::Ping(_)) => {
                // tungstenite answers pings on flush; nothing to do
            }
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    match &role {
        ConnectionRole::Client(client_id) => {
            // A replaced registration leaves the old connection dangling; its
            // closure must not take the new one offline.
            if state.registry.owns_transport(client_id, &tx).await {
                info!(client_id, "Client connection closed; marking offline");
                state.registry.set_client_offline(client_id).await;
            } else {
                debug!(client_id, "Stale client connection closed; ignoring");
            }
        }
        ConnectionRole::Admin(admin_id) => {
            info!(admin_id, "Admin connection closed; detaching transport");
            state.directory.detach_transport(admin_id).await;
        }
        ConnectionRole::Unbound => {}
    }

    forward_task.abort();

    Ok(())
}

/// Handle a JSON-RPC message
async fn handle_message(
    text: &str,
    state: &Arc<SharedState>,
    role: &mut ConnectionRole,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request: JsonRpcRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => {
            // Malformed message: report, drop, keep the connection open.
            debug!("Dropping malformed message: {}", e);
            let error = JsonRpcError::new(
                error_codes::PARSE_ERROR,
                format!("Failed to parse JSON: {}", e),
                json!(null),
            );
            let _ = tx.send(error.to_json()?).await;
            return Ok(());
        }
    };

    let request_id = request.id.clone().unwrap_or(json!(null));

    match request.method.as_str() {
        "client.register" => handle_client_register(request, state, role, tx).await,
        "admin.register" => handle_admin_register(request, state, role, tx).await,
        "session.offer" | "session.answer" => handle_session_sdp(request, state, role, tx).await,
        "session.ice_candidate" => handle_ice_candidate(request, state, role, tx).await,
        "client.disconnect" => handle_client_disconnect(request, state, tx).await,
        _ => {
            let error = JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Unknown method: {}", request.method),
                request_id,
            );
            tx.send(error.to_json()?)
                .await
                .map_err(|e| crate::Error::SignalingError(e.to_string()))?;
            Ok(())
        }
    }
}

/// Handle client.register
async fn handle_client_register(
    request: JsonRpcRequest,
    state: &Arc<SharedState>,
    role: &mut ConnectionRole,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request_id = request.id.clone().unwrap_or(json!(null));

    let params: ClientRegisterParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return send_invalid_params(tx, request_id, e).await,
    };

    let client_id = params.client_id.clone();
    match state
        .registry
        .register_client(tx.clone(), params, request_id)
        .await
    {
        Ok(()) => {
            *role = ConnectionRole::Client(client_id);
        }
        Err(e) => {
            // The registry already responded on the transport.
            debug!(client_id, "Registration rejected: {}", e);
        }
    }

    Ok(())
}

/// Handle admin.register
async fn handle_admin_register(
    request: JsonRpcRequest,
    state: &Arc<SharedState>,
    role: &mut ConnectionRole,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request_id = request.id.clone().unwrap_or(json!(null));

    let params: AdminRegisterParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return send_invalid_params(tx, request_id, e).await,
    };

    state
        .directory
        .register_admin(&params.admin_id, &params.organization_id, tx.clone())
        .await;
    *role = ConnectionRole::Admin(params.admin_id.clone());

    let owned = state
        .registry
        .get_clients_by_admin(&params.admin_id)
        .await
        .unwrap_or_default();

    let response = JsonRpcResponse::new(
        json!({
            "success": true,
            "admin_id": params.admin_id,
            "clients": owned,
        }),
        request_id,
    );
    tx.send(response.to_json()?)
        .await
        .map_err(|e| crate::Error::SignalingError(e.to_string()))?;

    Ok(())
}

/// Handle session.offer / session.answer relay
async fn handle_session_sdp(
    request: JsonRpcRequest,
    state: &Arc<SharedState>,
    role: &mut ConnectionRole,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request_id = request.id.clone().unwrap_or(json!(null));
    let method = request.method.clone();

    let Some(from) = role.endpoint_id().map(str::to_string) else {
        return send_not_registered(tx, request_id).await;
    };

    let params: SessionSdpParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return send_invalid_params(tx, request_id, e).await,
    };

    let forwarded = JsonRpcRequest::new(
        method.clone(),
        json!({
            "from": from,
            "to": params.to,
            "sdp": params.sdp,
        }),
        None,
    )
    .to_json()?;

    relay_to_target(state, tx, &params.to, forwarded, &method, request_id).await
}

/// Handle session.ice_candidate relay
async fn handle_ice_candidate(
    request: JsonRpcRequest,
    state: &Arc<SharedState>,
    role: &mut ConnectionRole,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request_id = request.id.clone().unwrap_or(json!(null));

    let Some(from) = role.endpoint_id().map(str::to_string) else {
        return send_not_registered(tx, request_id).await;
    };

    let params: IceCandidateParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return send_invalid_params(tx, request_id, e).await,
    };

    let forwarded = JsonRpcRequest::new(
        "session.ice_candidate".to_string(),
        json!({
            "from": from,
            "to": params.to,
            "candidate": params.candidate,
            "sdp_mid": params.sdp_mid,
            "sdp_m_line_index": params.sdp_m_line_index,
        }),
        None,
    )
    .to_json()?;

    relay_to_target(
        state,
        tx,
        &params.to,
        forwarded,
        "session.ice_candidate",
        request_id,
    )
    .await
}

/// Handle client.disconnect
async fn handle_client_disconnect(
    request: JsonRpcRequest,
    state: &Arc<SharedState>,
    tx: &mpsc::Sender<String>,
) -> crate::Result<()> {
    let request_id = request.id.clone().unwrap_or(json!(null));

    let params: ClientDisconnectParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return send_invalid_params(tx, request_id, e).await,
    };

    state.registry.set_client_offline(&params.client_id).await;

    let response = JsonRpcResponse::new(
        json!({
            "success": true,
            "client_id": params.client_id,
        }),
        request_id,
    );
    let _ = tx.send(response.to_json()?).await;

    Ok(())
}

/// Deliver a frame to `target`: a reachable admin, an online client, or,
/// for a known-but-offline client, the queued-request relay
async fn relay_to_target(
    state: &Arc<SharedState>,
    tx: &mpsc::Sender<String>,
    target: &str,
    frame: String,
    method: &str,
    request_id: Value,
) -> crate::Result<()> {
    use crate::registry::AdminDirectory;

    // Admins first: the target namespace is shared between the two.
    if let Some(admin) = state.directory.get_admin(target).await {
        if let Some(admin_tx) = admin.transport {
            debug!(method, target, "Relaying to admin");
            if let Err(e) = admin_tx.send(frame).await {
                warn!(method, target, "Admin relay failed: {}", e);
            }
            let response =
                JsonRpcResponse::new(json!({"success": true, "to": target}), request_id);
            let _ = tx.send(response.to_json()?).await;
            return Ok(());
        }

        let error = JsonRpcError::new(
            error_codes::TARGET_NOT_FOUND,
            format!("Admin unreachable: {}", target),
            request_id,
        );
        let _ = tx.send(error.to_json()?).await;
        return Ok(());
    }

    if let Some(client_tx) = state.registry.online_transport(target).await {
        debug!(method, target, "Relaying to client");
        if let Err(e) = client_tx.send(frame).await {
            warn!(method, target, "Client relay failed: {}", e);
        }
        let response = JsonRpcResponse::new(json!({"success": true, "to": target}), request_id);
        let _ = tx.send(response.to_json()?).await;
        return Ok(());
    }

    if state.registry.get_client(target).await.is_some() {
        // Known client, currently offline: hold the request for delivery on
        // its next registration.
        use crate::registry::QueuedRequestRelay;
        state.relay.enqueue(target, frame).await;
        let response = JsonRpcResponse::new(
            json!({"success": true, "to": target, "queued": true}),
            request_id,
        );
        let _ = tx.send(response.to_json()?).await;
        return Ok(());
    }

    let error = JsonRpcError::new(
        error_codes::TARGET_NOT_FOUND,
        format!("Target not found: {}", target),
        request_id,
    );
    let _ = tx.send(error.to_json()?).await;
    Ok(())
}

async fn send_not_registered(tx: &mpsc::Sender<String>, request_id: Value) -> crate::Result<()> {
    let error = JsonRpcError::new(
        error_codes::NOT_REGISTERED,
        "Not registered: send client.register or admin.register first".to_string(),
        request_id,
    );
    let _ = tx.send(error.to_json()?).await;
    Ok(())
}

async fn send_invalid_params(
    tx: &mpsc::Sender<String>,
    request_id: Value,
    err: serde_json::Error,
) -> crate::Result<()> {
    let error = JsonRpcError::new(
        error_codes::INVALID_PARAMS,
        format!("Invalid params: {}", err),
        request_id,
    );
    let _ = tx.send(error.to_json()?).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn dispatch(
        text: &str,
        state: &Arc<SharedState>,
        role: &mut ConnectionRole,
        tx: &mpsc::Sender<String>,
    ) {
        handle_message(text, state, role, tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_connection_usable() {
        let state = Arc::new(SharedState::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Unbound;

        dispatch("{{{ not json", &state, &mut role, &tx).await;
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("-32700"));

        // A valid registration still goes through afterwards.
        dispatch(
            r#"{"jsonrpc":"2.0","method":"admin.register","params":{"admin_id":"a1","organization_id":"o1"},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("\"success\":true"));
        assert_eq!(role, ConnectionRole::Admin("a1".to_string()));
    }

    #[tokio::test]
    async fn test_relay_requires_registration() {
        let state = Arc::new(SharedState::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Unbound;

        dispatch(
            r#"{"jsonrpc":"2.0","method":"session.offer","params":{"from":"x","to":"c1","sdp":"v=0"},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("-32001"));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let state = Arc::new(SharedState::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Unbound;

        dispatch(
            r#"{"jsonrpc":"2.0","method":"peer.teleport","params":{},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("-32601"));
    }

    #[tokio::test]
    async fn test_offer_to_unknown_target_errors() {
        let state = Arc::new(SharedState::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Admin("a1".to_string());

        dispatch(
            r#"{"jsonrpc":"2.0","method":"session.offer","params":{"from":"a1","to":"ghost","sdp":"v=0"},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;
        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("-32000"));
    }

    #[tokio::test]
    async fn test_offer_to_offline_client_is_queued() {
        let state = Arc::new(SharedState::new());

        // Register a client, then take it offline.
        let (client_tx, _client_rx) = mpsc::channel(8);
        state
            .registry
            .register_client(
                client_tx,
                ClientRegisterParams {
                    client_id: "c1".to_string(),
                    admin_id: "a1".to_string(),
                    organization_id: "o1".to_string(),
                    user_name: "Alice".to_string(),
                },
                json!(null),
            )
            .await
            .unwrap();
        state.registry.set_client_offline("c1").await;

        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Admin("a1".to_string());
        dispatch(
            r#"{"jsonrpc":"2.0","method":"session.offer","params":{"from":"a1","to":"c1","sdp":"v=0"},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;

        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("\"queued\":true"));
        assert_eq!(state.relay.pending("c1").await, 1);
    }

    #[tokio::test]
    async fn test_offer_relays_to_online_client_with_sender_identity() {
        let state = Arc::new(SharedState::new());

        let (client_tx, mut client_rx) = mpsc::channel(8);
        state
            .registry
            .register_client(
                client_tx,
                ClientRegisterParams {
                    client_id: "c1".to_string(),
                    admin_id: "a1".to_string(),
                    organization_id: "o1".to_string(),
                    user_name: "Alice".to_string(),
                },
                json!(null),
            )
            .await
            .unwrap();
        let _ack = client_rx.recv().await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut role = ConnectionRole::Admin("a1".to_string());
        // `from` is spoofed in params; the handler stamps the bound identity.
        dispatch(
            r#"{"jsonrpc":"2.0","method":"session.offer","params":{"from":"impostor","to":"c1","sdp":"v=0"},"id":"r1"}"#,
            &state,
            &mut role,
            &tx,
        )
        .await;

        let forwarded = client_rx.recv().await.unwrap();
        assert!(forwarded.contains("\"from\":\"a1\""));
        assert!(forwarded.contains("session.offer"));

        let reply = rx.recv().await.unwrap();
        assert!(reply.contains("\"success\":true"));
    }
}
