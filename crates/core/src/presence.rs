//! Same-device presence announcements
//!
//! When an admin endpoint becomes reachable again, clients backing off on
//! that organization should retry immediately instead of waiting out their
//! timer. [`PresenceBus`] is the in-process pub/sub primitive carrying those
//! announcements; [`PresenceBroadcaster`] is the callback facade an
//! application installs per admin/client surface.
//!
//! The bus is constructed explicitly and passed down as a dependency; there
//! is no process-global instance.

use crate::signaling::protocol::{epoch_ms, PresenceMessage};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// In-process presence pub/sub bus
///
/// Cloning shares the underlying channel. Messages are ephemeral: a
/// subscriber only observes emissions that happen while it is subscribed,
/// and each subscription observes an emission at most once.
#[derive(Debug, Clone)]
pub struct PresenceBus {
    tx: broadcast::Sender<PresenceMessage>,
}

impl PresenceBus {
    /// Create a bus with the given buffered capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit a presence message to all current subscribers
    ///
    /// Returns the number of subscribers reached; zero subscribers is not an
    /// error.
    pub fn emit(&self, msg: PresenceMessage) -> usize {
        match self.tx.send(msg) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }

    /// Subscribe to presence messages
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceMessage> {
        self.tx.subscribe()
    }
}

impl Default for PresenceBus {
    fn default() -> Self {
        Self::new(16)
    }
}

/// Cancellable handle for an installed presence listener
///
/// Dropping the subscription (or calling [`cancel`](Self::cancel)) stops the
/// listener task; no callbacks fire afterwards.
#[derive(Debug)]
pub struct PresenceSubscription {
    task: JoinHandle<()>,
}

impl PresenceSubscription {
    /// Stop the listener task
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Callback facade over the presence bus, scoped to one organization
pub struct PresenceBroadcaster {
    bus: PresenceBus,
    organization_id: Arc<Mutex<Option<String>>>,
    subscription: Mutex<Option<PresenceSubscription>>,
}

impl PresenceBroadcaster {
    /// Create a broadcaster over `bus`
    ///
    /// `organization_id` may be `None` until the organization context is
    /// known; no message matches while it is unset.
    pub fn new(bus: PresenceBus, organization_id: Option<String>) -> Self {
        Self {
            bus,
            organization_id: Arc::new(Mutex::new(organization_id)),
            subscription: Mutex::new(None),
        }
    }

    /// Announce that this organization's admin endpoint is reachable
    ///
    /// Emission problems (no organization configured, no subscribers) are
    /// logged and swallowed; this never fails toward the caller.
    pub fn broadcast_admin_online(&self) {
        let org_id = match self.organization_id.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };

        let Some(org_id) = org_id else {
            warn!("Presence broadcast skipped: no organization configured");
            return;
        };

        let reached = self
            .bus
            .emit(PresenceMessage::admin_online(org_id.clone(), epoch_ms()));
        debug!(org_id = %org_id, reached, "Broadcast admin-online");
    }

    /// Install the admin-online listener
    ///
    /// The callback fires for every presence message whose type tag is
    /// `admin-online` and whose organization matches the currently
    /// configured one (matching is evaluated per event, so a later
    /// [`set_organization_id`](Self::set_organization_id) takes effect
    /// without reinstalling).
    ///
    /// Idempotent: installing while a listener is active is a no-op, so a
    /// single emission can never fire the callback twice through one
    /// broadcaster.
    pub fn register_admin_online_listener<F>(&self, callback: F)
    where
        F: Fn(PresenceMessage) + Send + Sync + 'static,
    {
        let mut slot = match self.subscription.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if slot.is_some() {
            debug!("Presence listener already installed; ignoring");
            return;
        }

        let mut rx = self.bus.subscribe();
        let org_ref = Arc::clone(&self.organization_id);

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        let matches = org_ref
                            .lock()
                            .ok()
                            .and_then(|guard| guard.clone())
                            .map(|org| msg.matches(&org))
                            .unwrap_or(false);

                        if matches {
                            callback(msg);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Presence listener lagged; continuing");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *slot = Some(PresenceSubscription { task });
    }

    /// Update the organization scope used for emission and filtering
    pub fn set_organization_id(&self, organization_id: Option<String>) {
        if let Ok(mut guard) = self.organization_id.lock() {
            *guard = organization_id;
        }
    }

    /// Dispose the installed listener so a later
    /// [`register_admin_online_listener`](Self::register_admin_online_listener)
    /// can reinstall
    pub fn cleanup(&self) {
        let mut slot = match self.subscription.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(sub) = slot.take() {
            sub.cancel();
        }
    }

    /// Whether a listener is currently installed
    pub fn has_listener(&self) -> bool {
        self.subscription
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }
}

impl Drop for PresenceBroadcaster {
    fn drop(&mut self) {
        self.cleanup();
    }
}
