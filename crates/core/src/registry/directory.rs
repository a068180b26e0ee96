//! Registry collaborators: admin directory and queued-request relay
//!
//! Both are external collaborators from the registry's point of view and are
//! injected behind traits. The in-memory implementations here back the
//! signaling server binary and the tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Outbound transport handle for one connected endpoint
///
/// Frames are JSON strings; the connection's forwarding task owns the
/// receiving half.
pub type Transport = mpsc::Sender<String>;

/// Admin record as exposed by the directory
#[derive(Debug, Clone)]
pub struct AdminRecord {
    /// Admin identifier
    pub admin_id: String,

    /// Organization the admin endpoint serves
    pub organization_id: String,

    /// Ordered set of client IDs this admin owns
    pub client_ids: Vec<String>,

    /// Transport toward the admin endpoint, absent while it is unreachable
    pub transport: Option<Transport>,
}

/// Maps an admin identity to its transport and owned client IDs
///
/// The registry consumes this read-only, except for requesting registration
/// of a newly seen client ID.
#[async_trait]
pub trait AdminDirectory: Send + Sync {
    /// Look up an admin by ID; `None` is the explicit absent result
    async fn get_admin(&self, admin_id: &str) -> Option<AdminRecord>;

    /// Request that `client_id` be added to the admin's owned set
    ///
    /// Appends at the end of the ordered set; unknown admins are ignored.
    async fn register_client_id(&self, admin_id: &str, client_id: &str);
}

/// Delivers requests that arrived for a client while it was offline
///
/// Invoked by the registry exactly once per offline-to-online transition,
/// before any other post-reconnect notification is sent. The registry owns
/// client transports exclusively, so the drain target is passed in.
#[async_trait]
pub trait QueuedRequestRelay: Send + Sync {
    /// Queue a payload for a currently unreachable client
    async fn enqueue(&self, client_id: &str, payload: String);

    /// Deliver all queued payloads for `client_id` over `transport`
    async fn process_queued_requests_for_client(&self, client_id: &str, transport: &Transport);
}

#[derive(Debug, Default)]
struct AdminEntry {
    organization_id: String,
    client_ids: Vec<String>,
    transport: Option<Transport>,
}

/// In-memory admin directory
///
/// Admin endpoints announce themselves through the signaling server, which
/// attaches/detaches their transports here.
#[derive(Default)]
pub struct InMemoryAdminDirectory {
    admins: RwLock<HashMap<String, AdminEntry>>,
}

impl InMemoryAdminDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) an admin endpoint with its transport
    ///
    /// The owned client-ID set survives transport churn: an admin that drops
    /// and reconnects keeps its membership list.
    pub async fn register_admin(
        &self,
        admin_id: &str,
        organization_id: &str,
        transport: Transport,
    ) {
        let mut admins = self.admins.write().await;
        let entry = admins.entry(admin_id.to_string()).or_default();
        entry.organization_id = organization_id.to_string();
        entry.transport = Some(transport);
        debug!(admin_id, organization_id, "Admin registered in directory");
    }

    /// Detach the admin's transport (endpoint became unreachable)
    pub async fn detach_transport(&self, admin_id: &str) {
        let mut admins = self.admins.write().await;
        if let Some(entry) = admins.get_mut(admin_id) {
            entry.transport = None;
            debug!(admin_id, "Admin transport detached");
        }
    }

    /// Number of known admins
    pub async fn len(&self) -> usize {
        self.admins.read().await.len()
    }

    /// Whether the directory has no admins
    pub async fn is_empty(&self) -> bool {
        self.admins.read().await.is_empty()
    }
}

#[async_trait]
impl AdminDirectory for InMemoryAdminDirectory {
    async fn get_admin(&self, admin_id: &str) -> Option<AdminRecord> {
        let admins = self.admins.read().await;
        admins.get(admin_id).map(|entry| AdminRecord {
            admin_id: admin_id.to_string(),
            organization_id: entry.organization_id.clone(),
            client_ids: entry.client_ids.clone(),
            transport: entry.transport.clone(),
        })
    }

    async fn register_client_id(&self, admin_id: &str, client_id: &str) {
        let mut admins = self.admins.write().await;
        match admins.get_mut(admin_id) {
            Some(entry) => {
                if !entry.client_ids.iter().any(|id| id == client_id) {
                    entry.client_ids.push(client_id.to_string());
                    debug!(admin_id, client_id, "Client ID added to admin directory");
                }
            }
            None => {
                warn!(admin_id, client_id, "Cannot add client ID: unknown admin");
            }
        }
    }
}

/// In-memory queued-request relay
///
/// Preserves arrival order per client; delivery is best-effort (a failed
/// send logs and drops the remaining queue for that drain).
#[derive(Default)]
pub struct InMemoryRequestQueue {
    queues: RwLock<HashMap<String, VecDeque<String>>>,
}

impl InMemoryRequestQueue {
    /// Create an empty queue store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently queued for `client_id`
    pub async fn pending(&self, client_id: &str) -> usize {
        self.queues
            .read()
            .await
            .get(client_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl QueuedRequestRelay for InMemoryRequestQueue {
    async fn enqueue(&self, client_id: &str, payload: String) {
        let mut queues = self.queues.write().await;
        queues
            .entry(client_id.to_string())
            .or_default()
            .push_back(payload);
        debug!(client_id, "Request queued for offline client");
    }

    async fn process_queued_requests_for_client(&self, client_id: &str, transport: &Transport) {
        let drained = {
            let mut queues = self.queues.write().await;
            queues.remove(client_id).unwrap_or_default()
        };

        if drained.is_empty() {
            return;
        }

        debug!(client_id, count = drained.len(), "Draining queued requests");
        for payload in drained {
            if let Err(e) = transport.send(payload).await {
                warn!(client_id, "Failed to deliver queued request: {}", e);
                return;
            }
        }
    }
}
