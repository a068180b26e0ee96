//! Handshake seam between the orchestrator and the signaling layer
//!
//! One [`HandshakeDriver::attempt`] call equals one handshake attempt. The
//! shipping implementation performs the signaling-level handshake (connect,
//! register, deliver the session answer); producing the SDP answer itself is
//! the media layer's concern behind [`SessionNegotiator`].

use super::ConnectRequest;
use crate::config::CoordinatorConfig;
use crate::signaling::client::{SignalingChannel, SignalingEvent};
use crate::signaling::protocol::ClientRegisterParams;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// An established coordination session
///
/// The orchestrator holds the session while connected and awaits its end.
#[async_trait]
pub trait Session: Send {
    /// Resolve when the underlying channel goes away
    async fn closed(&mut self);

    /// Deliberately terminate the session
    async fn shutdown(&mut self);
}

/// Performs one handshake attempt toward the admin named in the request
#[async_trait]
pub trait HandshakeDriver: Send + Sync {
    /// Attempt a handshake; `identity` is the resolved device identity
    async fn attempt(&self, identity: &str, request: &ConnectRequest)
        -> Result<Box<dyn Session>>;
}

/// Produces the local SDP answer for an admin's session offer
///
/// Implemented by the media layer; the coordination core never inspects SDP.
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    /// Produce an SDP answer for `offer`
    async fn answer(&self, offer: &str) -> Result<String>;
}

/// Signaling-level handshake over a [`SignalingChannel`]
///
/// Connect, register, await the ack, then deliver the negotiated answer to
/// the admin, all bounded by the configured handshake timeout. An admin
/// that is not reachable surfaces as a retryable handshake error.
pub struct WsHandshake {
    config: CoordinatorConfig,
    negotiator: Arc<dyn SessionNegotiator>,
}

impl WsHandshake {
    /// Create a driver from the coordinator configuration
    pub fn new(config: CoordinatorConfig, negotiator: Arc<dyn SessionNegotiator>) -> Self {
        Self { config, negotiator }
    }

    async fn run_attempt(
        &self,
        identity: &str,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Session>> {
        let mut channel = SignalingChannel::connect(&self.config.signaling_url).await?;

        channel.register_client(ClientRegisterParams {
            client_id: identity.to_string(),
            admin_id: request.admin_id.clone(),
            organization_id: request.organization_id.clone(),
            user_name: request.user_name.clone(),
        })?;
        Self::await_ok(&mut channel, "registration").await?;
        debug!(identity, admin_id = %request.admin_id, "Registration acknowledged");

        let answer = self.negotiator.answer(&request.session_offer).await?;
        channel.send_answer(&request.admin_id, answer)?;
        Self::await_ok(&mut channel, "session answer").await?;

        info!(identity, admin_id = %request.admin_id, "Handshake complete");
        Ok(Box::new(WsSession { channel }))
    }

    /// Wait for the next response, converting errors and closure into
    /// handshake failures
    async fn await_ok(channel: &mut SignalingChannel, phase: &str) -> Result<()> {
        loop {
            match channel.next_event().await {
                Some(SignalingEvent::Response { .. }) => return Ok(()),
                Some(SignalingEvent::Error { code, message, .. }) => {
                    return Err(Error::HandshakeError(format!(
                        "{} rejected ({}): {}",
                        phase, code, message
                    )));
                }
                Some(SignalingEvent::Closed) | None => {
                    return Err(Error::WebSocketError(format!(
                        "Channel closed during {}",
                        phase
                    )));
                }
                Some(other) => {
                    // Relayed traffic can arrive between our acks; it is not
                    // part of the handshake.
                    debug!(?other, "Ignoring event during {}", phase);
                }
            }
        }
    }
}

#[async_trait]
impl HandshakeDriver for WsHandshake {
    async fn attempt(
        &self,
        identity: &str,
        request: &ConnectRequest,
    ) -> Result<Box<dyn Session>> {
        let timeout = Duration::from_secs(self.config.handshake_timeout_secs);
        match tokio::time::timeout(timeout, self.run_attempt(identity, request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::OperationTimeout(format!(
                "Handshake exceeded {:?}",
                timeout
            ))),
        }
    }
}

/// Session backed by a live signaling channel
struct WsSession {
    channel: SignalingChannel,
}

#[async_trait]
impl Session for WsSession {
    async fn closed(&mut self) {
        loop {
            match self.channel.next_event().await {
                Some(SignalingEvent::Closed) | None => break,
                Some(event) => {
                    // Session-time relayed traffic (further ICE candidates,
                    // admin renegotiation offers) belongs to the media layer.
                    debug!(?event, "Session event");
                }
            }
        }
        warn!("Signaling session ended");
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.channel.disconnect(Some("cancelled".to_string())) {
            debug!("Disconnect notification failed: {}", e);
        }
        self.channel.close();
    }
}

/// Negotiator that echoes a constant answer; placeholder until a media
/// engine is attached
pub struct StaticNegotiator {
    answer: String,
}

impl StaticNegotiator {
    /// Answer every offer with `answer`
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl SessionNegotiator for StaticNegotiator {
    async fn answer(&self, _offer: &str) -> Result<String> {
        Ok(self.answer.clone())
    }
}
