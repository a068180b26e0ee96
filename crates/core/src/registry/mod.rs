//! Server-side client registry
//!
//! Tracks every connected member client, its admin/organization affiliation
//! and its liveness, and pushes reachability notifications to the owning
//! admin endpoint. The registry owns each client's transport handle
//! exclusively; collaborators get snapshots, never the handle.

pub mod directory;

pub use directory::{
    AdminDirectory, AdminRecord, InMemoryAdminDirectory, InMemoryRequestQueue, QueuedRequestRelay,
    Transport,
};

use crate::signaling::protocol::{epoch_ms, ClientRegisterParams, ClientStatusParams};
use crate::signaling::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::signaling::protocol::error_codes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Client liveness status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    /// The client has an attached, usable transport
    Online,
    /// The client's transport is gone; sends must not use the stored handle
    Offline,
}

/// One registered client
///
/// Affiliation (admin/organization) is immutable after first registration;
/// status and `last_seen_ms` are the only mutations afterwards. Records are
/// never hard-deleted for the lifetime of the process.
struct ClientRecord {
    client_id: String,
    admin_id: String,
    organization_id: String,
    user_name: String,
    tx: Transport,
    status: ClientStatus,
    last_seen_ms: u64,
    connected_at_ms: u64,
}

/// Read-only view of a client record (no transport handle)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    /// Client identifier
    pub client_id: String,
    /// Owning admin identifier
    pub admin_id: String,
    /// Owning organization identifier
    pub organization_id: String,
    /// Display name
    pub user_name: String,
    /// Liveness status
    pub status: ClientStatus,
    /// Epoch milliseconds of the last observed activity
    pub last_seen_ms: u64,
    /// Epoch milliseconds of the current registration
    pub connected_at_ms: u64,
}

/// Per-client projection returned by [`ClientRegistry::get_clients_by_admin`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSummary {
    /// Client identifier
    pub client_id: String,
    /// Display name
    pub user_name: String,
    /// Liveness status
    pub status: ClientStatus,
    /// Epoch milliseconds of the last observed activity
    pub last_seen_ms: u64,
}

/// Server-side registry of member clients
///
/// Shared across connection handlers; mutations are serialized through the
/// write guard of the inner map.
pub struct ClientRegistry {
    clients: RwLock<HashMap<String, ClientRecord>>,
    directory: Arc<dyn AdminDirectory>,
    relay: Arc<dyn QueuedRequestRelay>,
}

impl ClientRegistry {
    /// Create a registry over the injected collaborators
    pub fn new(directory: Arc<dyn AdminDirectory>, relay: Arc<dyn QueuedRequestRelay>) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            directory,
            relay,
        }
    }

    /// Register a client (first registration or reconnection)
    ///
    /// Inserts or replaces the record, marks it online, stamps `last_seen`
    /// and acks the client over `transport` with its assigned ID. On an
    /// offline-to-online transition the queued-request relay drains first;
    /// afterwards the owning admin is resolved through the directory and
    /// notified best-effort. A directory that does not yet list the client
    /// ID is asked to add it.
    ///
    /// Re-registration that tries to change the affiliation is rejected;
    /// the prior record is left untouched.
    pub async fn register_client(
        &self,
        transport: Transport,
        params: ClientRegisterParams,
        request_id: Value,
    ) -> crate::Result<()> {
        let now = epoch_ms();

        let was_offline = {
            let mut clients = self.clients.write().await;

            if let Some(existing) = clients.get(&params.client_id) {
                if existing.admin_id != params.admin_id
                    || existing.organization_id != params.organization_id
                {
                    let err = JsonRpcError::new(
                        error_codes::AFFILIATION_MISMATCH,
                        format!(
                            "Client {} is already affiliated with another admin/organization",
                            params.client_id
                        ),
                        request_id,
                    );
                    if let Ok(json) = err.to_json() {
                        let _ = transport.send(json).await;
                    }
                    return Err(crate::Error::RegistrationRejected(params.client_id));
                }
            }

            let was_offline = clients
                .get(&params.client_id)
                .map(|r| r.status == ClientStatus::Offline)
                .unwrap_or(false);

            let last_seen_ms = clients
                .get(&params.client_id)
                .map(|r| r.last_seen_ms.max(now))
                .unwrap_or(now);

            clients.insert(
                params.client_id.clone(),
                ClientRecord {
                    client_id: params.client_id.clone(),
                    admin_id: params.admin_id.clone(),
                    organization_id: params.organization_id.clone(),
                    user_name: params.user_name.clone(),
                    tx: transport.clone(),
                    status: ClientStatus::Online,
                    last_seen_ms,
                    connected_at_ms: now,
                },
            );

            was_offline
        };

        info!(
            client_id = %params.client_id,
            admin_id = %params.admin_id,
            organization_id = %params.organization_id,
            reconnect = was_offline,
            "Client registered"
        );

        // Ack the client. A dead transport is a best-effort failure; the
        // registration itself stands.
        let ack = JsonRpcResponse::new(
            json!({
                "success": true,
                "client_id": params.client_id,
                "registered_at": now,
            }),
            request_id,
        );
        match ack.to_json() {
            Ok(json) => {
                if let Err(e) = transport.send(json).await {
                    warn!(client_id = %params.client_id, "Failed to ack registration: {}", e);
                }
            }
            Err(e) => warn!(client_id = %params.client_id, "Failed to encode ack: {}", e),
        }

        // Pending work queued while the client was away is delivered before
        // anyone is told about the reconnection.
        if was_offline {
            self.relay
                .process_queued_requests_for_client(&params.client_id, &transport)
                .await;
        }

        match self.directory.get_admin(&params.admin_id).await {
            Some(admin) => {
                if !admin.client_ids.iter().any(|id| id == &params.client_id) {
                    self.directory
                        .register_client_id(&params.admin_id, &params.client_id)
                        .await;
                }

                self.notify_admin(
                    &admin,
                    "client.online",
                    ClientStatusParams {
                        client_id: params.client_id.clone(),
                        user_name: Some(params.user_name.clone()),
                        ts: now,
                    },
                )
                .await;
            }
            None => {
                debug!(admin_id = %params.admin_id, "Owning admin not in directory yet");
            }
        }

        Ok(())
    }

    /// Mark a client offline and notify its admin
    ///
    /// No-op (not an error) for unknown client IDs.
    pub async fn set_client_offline(&self, client_id: &str) {
        let now = epoch_ms();

        let notify = {
            let mut clients = self.clients.write().await;
            match clients.get_mut(client_id) {
                Some(record) => {
                    record.status = ClientStatus::Offline;
                    record.last_seen_ms = record.last_seen_ms.max(now);
                    Some((record.admin_id.clone(), record.user_name.clone()))
                }
                None => {
                    debug!(client_id, "Offline for unknown client; ignoring");
                    None
                }
            }
        };

        let Some((admin_id, _user_name)) = notify else {
            return;
        };

        info!(client_id, admin_id = %admin_id, "Client went offline");

        if let Some(admin) = self.directory.get_admin(&admin_id).await {
            self.notify_admin(
                &admin,
                "client.offline",
                ClientStatusParams {
                    client_id: client_id.to_string(),
                    user_name: None,
                    ts: now,
                },
            )
            .await;
        }
    }

    /// Look up one client; `None` is the explicit absent result
    pub async fn get_client(&self, client_id: &str) -> Option<ClientSnapshot> {
        let clients = self.clients.read().await;
        clients.get(client_id).map(|record| ClientSnapshot {
            client_id: record.client_id.clone(),
            admin_id: record.admin_id.clone(),
            organization_id: record.organization_id.clone(),
            user_name: record.user_name.clone(),
            status: record.status,
            last_seen_ms: record.last_seen_ms,
            connected_at_ms: record.connected_at_ms,
        })
    }

    /// Project an admin's owned clients, preserving directory order
    ///
    /// IDs the registry has never seen are skipped, not errored.
    pub async fn get_clients_by_admin(&self, admin_id: &str) -> crate::Result<Vec<ClientSummary>> {
        let admin = self
            .directory
            .get_admin(admin_id)
            .await
            .ok_or_else(|| crate::Error::AdminNotFound(admin_id.to_string()))?;

        let clients = self.clients.read().await;
        Ok(admin
            .client_ids
            .iter()
            .filter_map(|id| clients.get(id))
            .map(|record| ClientSummary {
                client_id: record.client_id.clone(),
                user_name: record.user_name.clone(),
                status: record.status,
                last_seen_ms: record.last_seen_ms,
            })
            .collect())
    }

    /// Transport toward an online client, if any
    ///
    /// Offline records never hand out their stored transport.
    pub async fn online_transport(&self, client_id: &str) -> Option<Transport> {
        let clients = self.clients.read().await;
        clients
            .get(client_id)
            .filter(|record| record.status == ClientStatus::Online)
            .map(|record| record.tx.clone())
    }

    /// Whether `transport` is the handle currently stored for `client_id`
    ///
    /// Lets a connection handler distinguish "this client's live connection
    /// closed" from "a stale connection closed after the registration was
    /// replaced".
    pub async fn owns_transport(&self, client_id: &str, transport: &Transport) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(client_id)
            .map(|record| record.tx.same_channel(transport))
            .unwrap_or(false)
    }

    /// Number of known client records (online and offline)
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Whether the registry holds no records
    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    /// Push a notification to an admin transport, best-effort
    async fn notify_admin(&self, admin: &AdminRecord, method: &str, params: ClientStatusParams) {
        let Some(tx) = admin.transport.as_ref() else {
            debug!(admin_id = %admin.admin_id, method, "Admin unreachable; notification skipped");
            return;
        };

        let notification = JsonRpcRequest::new(
            method.to_string(),
            serde_json::to_value(&params).unwrap_or(Value::Null),
            None,
        );

        match notification.to_json() {
            Ok(json) => {
                if let Err(e) = tx.send(json).await {
                    warn!(admin_id = %admin.admin_id, method, "Failed to notify admin: {}", e);
                }
            }
            Err(e) => warn!(admin_id = %admin.admin_id, method, "Failed to encode notification: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn params(client_id: &str) -> ClientRegisterParams {
        ClientRegisterParams {
            client_id: client_id.to_string(),
            admin_id: "a1".to_string(),
            organization_id: "o1".to_string(),
            user_name: "Alice".to_string(),
        }
    }

    fn registry_with_admin() -> (
        Arc<ClientRegistry>,
        Arc<InMemoryAdminDirectory>,
        Arc<InMemoryRequestQueue>,
    ) {
        let directory = Arc::new(InMemoryAdminDirectory::new());
        let relay = Arc::new(InMemoryRequestQueue::new());
        let registry = Arc::new(ClientRegistry::new(
            Arc::clone(&directory) as Arc<dyn AdminDirectory>,
            Arc::clone(&relay) as Arc<dyn QueuedRequestRelay>,
        ));
        (registry, directory, relay)
    }

    #[tokio::test]
    async fn test_register_marks_online_with_affiliation() {
        let (registry, _directory, _relay) = registry_with_admin();
        let (tx, mut rx) = mpsc::channel(8);

        registry
            .register_client(tx, params("c1"), serde_json::json!("req-1"))
            .await
            .unwrap();

        let snapshot = registry.get_client("c1").await.unwrap();
        assert_eq!(snapshot.status, ClientStatus::Online);
        assert_eq!(snapshot.admin_id, "a1");
        assert_eq!(snapshot.organization_id, "o1");
        assert_eq!(snapshot.user_name, "Alice");

        // Ack carries the assigned ID.
        let ack = rx.recv().await.unwrap();
        assert!(ack.contains("\"client_id\":\"c1\""));
        assert!(ack.contains("\"req-1\""));
    }

    #[tokio::test]
    async fn test_register_notifies_admin_and_updates_directory() {
        let (registry, directory, _relay) = registry_with_admin();
        let (admin_tx, mut admin_rx) = mpsc::channel(8);
        directory.register_admin("a1", "o1", admin_tx).await;

        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();

        let notification = admin_rx.recv().await.unwrap();
        assert!(notification.contains("client.online"));
        assert!(notification.contains("\"c1\""));

        let admin = directory.get_admin("a1").await.unwrap();
        assert_eq!(admin.client_ids, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_register_without_admin_still_succeeds() {
        let (registry, _directory, _relay) = registry_with_admin();
        let (tx, _rx) = mpsc::channel(8);

        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();
        assert!(registry.get_client("c1").await.is_some());
    }

    #[tokio::test]
    async fn test_affiliation_change_rejected() {
        let (registry, _directory, _relay) = registry_with_admin();
        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();

        let (tx2, mut rx2) = mpsc::channel(8);
        let mut other = params("c1");
        other.admin_id = "a2".to_string();
        let result = registry
            .register_client(tx2, other, serde_json::json!("req-2"))
            .await;

        assert!(matches!(
            result,
            Err(crate::Error::RegistrationRejected(_))
        ));
        // Prior affiliation untouched.
        assert_eq!(registry.get_client("c1").await.unwrap().admin_id, "a1");
        // Rejecting transport got the error response.
        let err = rx2.recv().await.unwrap();
        assert!(err.contains("\"error\""));
    }

    #[tokio::test]
    async fn test_set_offline_unknown_is_noop() {
        let (registry, _directory, _relay) = registry_with_admin();
        registry.set_client_offline("ghost").await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_set_offline_updates_record_and_notifies_admin() {
        let (registry, directory, _relay) = registry_with_admin();
        let (admin_tx, mut admin_rx) = mpsc::channel(8);
        directory.register_admin("a1", "o1", admin_tx).await;

        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();
        let _online = admin_rx.recv().await.unwrap();

        registry.set_client_offline("c1").await;

        let snapshot = registry.get_client("c1").await.unwrap();
        assert_eq!(snapshot.status, ClientStatus::Offline);

        let notification = admin_rx.recv().await.unwrap();
        assert!(notification.contains("client.offline"));
    }

    #[tokio::test]
    async fn test_offline_transport_not_handed_out() {
        let (registry, _directory, _relay) = registry_with_admin();
        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();

        assert!(registry.online_transport("c1").await.is_some());
        registry.set_client_offline("c1").await;
        assert!(registry.online_transport("c1").await.is_none());
    }

    #[tokio::test]
    async fn test_get_clients_by_admin_preserves_order_and_skips_unknown() {
        let (registry, directory, _relay) = registry_with_admin();
        let (admin_tx, _admin_rx) = mpsc::channel(8);
        directory.register_admin("a1", "o1", admin_tx).await;

        // Directory lists an ID the registry never saw.
        directory.register_client_id("a1", "never-seen").await;

        let (tx1, _rx1) = mpsc::channel(8);
        registry
            .register_client(tx1, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();
        let (tx2, _rx2) = mpsc::channel(8);
        let mut p2 = params("c2");
        p2.user_name = "Bob".to_string();
        registry
            .register_client(tx2, p2, serde_json::Value::Null)
            .await
            .unwrap();

        let summaries = registry.get_clients_by_admin("a1").await.unwrap();
        let ids: Vec<&str> = summaries.iter().map(|s| s.client_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(summaries[1].user_name, "Bob");
    }

    #[tokio::test]
    async fn test_get_clients_by_unknown_admin_is_absent() {
        let (registry, _directory, _relay) = registry_with_admin();
        let result = registry.get_clients_by_admin("missing").await;
        assert!(matches!(result, Err(crate::Error::AdminNotFound(_))));
    }

    #[tokio::test]
    async fn test_reconnect_drains_queue_before_admin_notification() {
        let (registry, directory, relay) = registry_with_admin();
        let (admin_tx, mut admin_rx) = mpsc::channel(8);
        directory.register_admin("a1", "o1", admin_tx).await;

        let (tx, _rx) = mpsc::channel(8);
        registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();
        let _online = admin_rx.recv().await.unwrap();

        registry.set_client_offline("c1").await;
        let _offline = admin_rx.recv().await.unwrap();

        relay.enqueue("c1", "queued-offer".to_string()).await;

        let (tx2, mut rx2) = mpsc::channel(8);
        registry
            .register_client(tx2, params("c1"), serde_json::Value::Null)
            .await
            .unwrap();

        // Client sees: ack, then the queued payload.
        let ack = rx2.recv().await.unwrap();
        assert!(ack.contains("\"success\":true"));
        let queued = rx2.recv().await.unwrap();
        assert_eq!(queued, "queued-offer");
        assert_eq!(relay.pending("c1").await, 0);

        // Admin is told about the reconnection after the drain.
        let notification = admin_rx.recv().await.unwrap();
        assert!(notification.contains("client.online"));
    }

    #[tokio::test]
    async fn test_dead_admin_transport_does_not_fail_registration() {
        let (registry, directory, _relay) = registry_with_admin();
        let (admin_tx, admin_rx) = mpsc::channel(8);
        directory.register_admin("a1", "o1", admin_tx).await;
        drop(admin_rx); // admin channel is gone

        let (tx, _rx) = mpsc::channel(8);
        let result = registry
            .register_client(tx, params("c1"), serde_json::Value::Null)
            .await;
        assert!(result.is_ok());
        assert!(registry.get_client("c1").await.is_some());
    }
}
