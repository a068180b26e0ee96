//! Client-side connection orchestration
//!
//! Drives the attempt/retry state machine for establishing a session with a
//! specific admin offer: `idle → connecting → {connected, backing-off} →
//! connecting → … → connected | abandoned`. Retries are paced by the
//! backoff policy engine and pre-empted by same-device presence events for
//! the right organization.

pub mod handshake;

pub use handshake::{HandshakeDriver, Session, SessionNegotiator, StaticNegotiator, WsHandshake};

use crate::backoff::{BackoffMetrics, BackoffPolicy};
use crate::config::CoordinatorConfig;
use crate::identity::IdentityProvider;
use crate::presence::PresenceBus;
use crate::signaling::protocol::PresenceMessage;
use crate::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Connection attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection requested yet
    Idle,
    /// A handshake attempt is in flight
    Connecting,
    /// A session is established
    Connected,
    /// Waiting out a retry delay (or a presence pre-emption)
    BackingOff,
    /// Cancelled by the caller; no further retries
    Abandoned,
}

/// A connection request toward one admin
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Admin's session offer, obtained out of band
    pub session_offer: String,

    /// Caller-supplied identity; resolved through the identity provider
    /// when absent
    pub client_id: Option<String>,

    /// Target admin
    pub admin_id: String,

    /// Target organization (scopes presence pre-emption)
    pub organization_id: String,

    /// Display name shown to the admin
    pub user_name: String,
}

/// Connection orchestrator
///
/// One logical task per connection request: [`run`](Self::run) drives the
/// state machine until the request is cancelled or fails unrecoverably.
/// Share via `Arc` to observe state or cancel from outside.
pub struct ConnectionOrchestrator {
    config: CoordinatorConfig,
    driver: Arc<dyn HandshakeDriver>,
    identity: Arc<dyn IdentityProvider>,
    presence: PresenceBus,

    state: Mutex<ConnectionState>,
    backoff: Mutex<BackoffPolicy>,
    attempts: AtomicU64,
    in_flight: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionOrchestrator {
    /// Create an orchestrator over its dependencies
    ///
    /// Validates the configuration up front.
    pub fn new(
        config: CoordinatorConfig,
        driver: Arc<dyn HandshakeDriver>,
        identity: Arc<dyn IdentityProvider>,
        presence: PresenceBus,
    ) -> Result<Self> {
        config.validate()?;
        let backoff = BackoffPolicy::new(config.backoff.clone());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            driver,
            identity,
            presence,
            state: Mutex::new(ConnectionState::Idle),
            backoff: Mutex::new(backoff),
            attempts: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Handshake attempts issued so far
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Snapshot of the backoff engine's metrics
    pub fn backoff_metrics(&self) -> BackoffMetrics {
        self.backoff
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .metrics()
    }

    /// Feed an observed success rate into the backoff policy
    ///
    /// Called between connection lifecycles, e.g. by an application that
    /// tracks how often pairing succeeds on this network.
    pub fn adapt_backoff(&self, success_rate: f64) {
        self.backoff
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .adaptive_reset(success_rate);
    }

    /// Cancel the connection request
    ///
    /// Moves the state machine to `Abandoned`: outstanding timers are
    /// cancelled, an established session is shut down, and no further
    /// retries occur.
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Drive the state machine for `request`
    ///
    /// Returns `Ok(())` after cancellation, or the terminal error for an
    /// unrecoverable (non-retryable) failure. Retryable failures never
    /// surface here; they feed the backing-off transition.
    pub async fn run(&self, request: ConnectRequest) -> Result<()> {
        // Identity is resolved once and reused across every attempt.
        let identity = match &request.client_id {
            Some(id) => id.clone(),
            None => self.identity.get_or_create_device_id()?,
        };

        info!(
            identity = %identity,
            admin_id = %request.admin_id,
            organization_id = %request.organization_id,
            "Connection requested"
        );

        let mut presence_rx = self.presence.subscribe();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            self.set_state(ConnectionState::Connecting);

            // At most one in-flight handshake per instance.
            if self.in_flight.swap(true, Ordering::SeqCst) {
                return Err(crate::Error::InternalError(
                    "Overlapping handshake attempt".to_string(),
                ));
            }
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let outcome = tokio::select! {
                result = self.driver.attempt(&identity, &request) => Some(result),
                _ = shutdown_rx.recv() => None,
            };
            self.in_flight.store(false, Ordering::SeqCst);

            match outcome {
                None => {
                    self.set_state(ConnectionState::Abandoned);
                    info!(identity = %identity, "Connection abandoned during handshake");
                    return Ok(());
                }
                Some(Ok(mut session)) => {
                    self.set_state(ConnectionState::Connected);
                    self.backoff
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .reset();
                    info!(identity = %identity, admin_id = %request.admin_id, "Connected");

                    tokio::select! {
                        _ = session.closed() => {
                            warn!(identity = %identity, "Session ended; scheduling retry");
                        }
                        _ = shutdown_rx.recv() => {
                            session.shutdown().await;
                            self.set_state(ConnectionState::Abandoned);
                            info!(identity = %identity, "Connection abandoned");
                            return Ok(());
                        }
                    }
                }
                Some(Err(e)) if e.is_retryable() => {
                    warn!(identity = %identity, "Handshake failed: {}", e);
                }
                Some(Err(e)) => {
                    self.set_state(ConnectionState::Idle);
                    warn!(identity = %identity, "Handshake failed unrecoverably: {}", e);
                    return Err(e);
                }
            }

            self.set_state(ConnectionState::BackingOff);
            let delay = self
                .backoff
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .next_interval();
            debug!(identity = %identity, ?delay, "Backing off");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    debug!(identity = %identity, "Backoff elapsed");
                }
                msg = Self::matching_presence(&mut presence_rx, &request.organization_id) => {
                    info!(
                        identity = %identity,
                        ts = msg.ts,
                        "Admin presence pre-empted backoff"
                    );
                }
                _ = shutdown_rx.recv() => {
                    self.set_state(ConnectionState::Abandoned);
                    info!(identity = %identity, "Connection abandoned during backoff");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for an admin-online presence event naming `organization_id`
    ///
    /// Events for other organizations are ignored; a lagged receiver keeps
    /// listening.
    async fn matching_presence(
        rx: &mut broadcast::Receiver<PresenceMessage>,
        organization_id: &str,
    ) -> PresenceMessage {
        loop {
            match rx.recv().await {
                Ok(msg) if msg.matches(organization_id) => return msg,
                Ok(msg) => {
                    debug!(org_id = %msg.org_id, "Ignoring presence for other organization");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Presence receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Bus gone; fall back to timer-driven retries only.
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        debug!(from = ?*state, to = ?next, "Orchestrator transition");
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffStrategy, CoordinatorConfig};
    use crate::identity::MemoryIdentity;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Scripted handshake outcomes for the mock driver
    enum Outcome {
        Fail,
        Connect,
    }

    struct MockSession {
        close_rx: mpsc::Receiver<()>,
    }

    #[async_trait]
    impl Session for MockSession {
        async fn closed(&mut self) {
            let _ = self.close_rx.recv().await;
        }

        async fn shutdown(&mut self) {}
    }

    struct MockDriver {
        script: Mutex<VecDeque<Outcome>>,
        /// Close senders for handed-out sessions
        closers: Mutex<Vec<mpsc::Sender<()>>>,
    }

    impl MockDriver {
        fn new(script: Vec<Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                closers: Mutex::new(Vec::new()),
            })
        }

        fn close_session(&self, index: usize) {
            let closers = self.closers.lock().unwrap();
            let _ = closers[index].try_send(());
        }
    }

    #[async_trait]
    impl HandshakeDriver for MockDriver {
        async fn attempt(
            &self,
            _identity: &str,
            _request: &ConnectRequest,
        ) -> crate::Result<Box<dyn Session>> {
            let outcome = self.script.lock().unwrap().pop_front();
            match outcome {
                Some(Outcome::Connect) => {
                    let (close_tx, close_rx) = mpsc::channel(1);
                    self.closers.lock().unwrap().push(close_tx);
                    Ok(Box::new(MockSession { close_rx }))
                }
                Some(Outcome::Fail) | None => Err(crate::Error::HandshakeError(
                    "scripted failure".to_string(),
                )),
            }
        }
    }

    fn config_with_backoff(initial_ms: u64, max_ms: u64) -> CoordinatorConfig {
        let mut config = CoordinatorConfig::default();
        config.backoff.strategy = BackoffStrategy::Exponential;
        config.backoff.initial_ms = initial_ms;
        config.backoff.max_ms = max_ms;
        config.backoff.jitter_factor = 0.0;
        config.backoff.adaptive_floor_ms = initial_ms.min(1000);
        config
    }

    fn request() -> ConnectRequest {
        ConnectRequest {
            session_offer: "v=0".to_string(),
            client_id: None,
            admin_id: "a1".to_string(),
            organization_id: "org-A".to_string(),
            user_name: "Alice".to_string(),
        }
    }

    fn orchestrator(
        config: CoordinatorConfig,
        driver: Arc<MockDriver>,
        bus: &PresenceBus,
    ) -> Arc<ConnectionOrchestrator> {
        Arc::new(
            ConnectionOrchestrator::new(
                config,
                driver,
                Arc::new(MemoryIdentity::fixed("device-1")),
                bus.clone(),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_presence_preempts_backoff() {
        let bus = PresenceBus::new(16);
        let driver = MockDriver::new(vec![Outcome::Fail, Outcome::Connect]);
        let orch = orchestrator(
            config_with_backoff(60_000, 120_000),
            Arc::clone(&driver),
            &bus,
        );

        let orch_run = Arc::clone(&orch);
        let task = tokio::spawn(async move { orch_run.run(request()).await });

        // First attempt fails; the orchestrator settles into a long backoff.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orch.state(), ConnectionState::BackingOff);
        assert_eq!(orch.attempt_count(), 1);

        bus.emit(PresenceMessage::admin_online("org-A", 1));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Pre-empted: second attempt happened long before the timer.
        assert_eq!(orch.attempt_count(), 2);
        assert_eq!(orch.state(), ConnectionState::Connected);

        orch.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(orch.state(), ConnectionState::Abandoned);
    }

    #[tokio::test]
    async fn test_presence_for_other_org_is_ignored() {
        let bus = PresenceBus::new(16);
        let driver = MockDriver::new(vec![Outcome::Fail]);
        let orch = orchestrator(
            config_with_backoff(60_000, 120_000),
            Arc::clone(&driver),
            &bus,
        );

        let orch_run = Arc::clone(&orch);
        let task = tokio::spawn(async move { orch_run.run(request()).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        bus.emit(PresenceMessage::admin_online("org-B", 1));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(orch.attempt_count(), 1);
        assert_eq!(orch.state(), ConnectionState::BackingOff);

        orch.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_abandons() {
        let bus = PresenceBus::new(16);
        let driver = MockDriver::new(vec![Outcome::Fail]);
        let orch = orchestrator(
            config_with_backoff(60_000, 120_000),
            Arc::clone(&driver),
            &bus,
        );

        let orch_run = Arc::clone(&orch);
        let task = tokio::spawn(async move { orch_run.run(request()).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        orch.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(orch.state(), ConnectionState::Abandoned);
        assert_eq!(orch.attempt_count(), 1);

        // No stale retry fires after abandonment.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(orch.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_backoff_and_session_end_retries() {
        let bus = PresenceBus::new(16);
        let driver = MockDriver::new(vec![Outcome::Fail, Outcome::Connect, Outcome::Connect]);
        let orch = orchestrator(config_with_backoff(50, 200), Arc::clone(&driver), &bus);

        let orch_run = Arc::clone(&orch);
        let task = tokio::spawn(async move { orch_run.run(request()).await });

        // Fail -> short backoff -> connect.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(orch.state(), ConnectionState::Connected);
        assert_eq!(orch.backoff_metrics().total_attempts, 0); // reset on success

        // Kill the session; a retry reconnects.
        driver.close_session(0);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(orch.state(), ConnectionState::Connected);
        assert_eq!(orch.attempt_count(), 3);

        orch.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unrecoverable_failure_surfaces() {
        struct RejectingDriver;

        #[async_trait]
        impl HandshakeDriver for RejectingDriver {
            async fn attempt(
                &self,
                _identity: &str,
                _request: &ConnectRequest,
            ) -> crate::Result<Box<dyn Session>> {
                Err(crate::Error::RegistrationRejected("c1".to_string()))
            }
        }

        let bus = PresenceBus::new(16);
        let orch = Arc::new(
            ConnectionOrchestrator::new(
                config_with_backoff(50, 200),
                Arc::new(RejectingDriver),
                Arc::new(MemoryIdentity::fixed("device-1")),
                bus.clone(),
            )
            .unwrap(),
        );

        let result = orch.run(request()).await;
        assert!(matches!(
            result,
            Err(crate::Error::RegistrationRejected(_))
        ));
        assert_eq!(orch.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_caller_supplied_identity_skips_provider() {
        struct PanickingIdentity;
        impl crate::identity::IdentityProvider for PanickingIdentity {
            fn get_or_create_device_id(&self) -> crate::Result<String> {
                panic!("identity provider must not be consulted");
            }
        }

        let bus = PresenceBus::new(16);
        let driver = MockDriver::new(vec![Outcome::Connect]);
        let orch = Arc::new(
            ConnectionOrchestrator::new(
                config_with_backoff(50, 200),
                driver,
                Arc::new(PanickingIdentity),
                bus.clone(),
            )
            .unwrap(),
        );

        let mut req = request();
        req.client_id = Some("given-id".to_string());

        let orch_run = Arc::clone(&orch);
        let task = tokio::spawn(async move { orch_run.run(req).await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(orch.state(), ConnectionState::Connected);

        orch.cancel();
        task.await.unwrap().unwrap();
    }
}
