//! Client-side signaling channel
//!
//! Message-oriented, full-duplex connection to the signaling server. Outbound
//! sends go through an unbounded channel consumed by a sender task; inbound
//! frames are decoded into [`SignalingEvent`]s surfaced through
//! [`SignalingChannel::next_event`]. Malformed inbound messages are dropped
//! and logged; the channel stays open.

use super::protocol::*;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Decoded inbound signaling traffic
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// JSON-RPC response to one of our requests (e.g. the registration ack)
    Response {
        /// Result payload
        result: serde_json::Value,
        /// Request ID the response corresponds to
        id: serde_json::Value,
    },

    /// JSON-RPC error response
    Error {
        /// Error code
        code: i32,
        /// Human-readable message
        message: String,
        /// Request ID the error corresponds to
        id: serde_json::Value,
    },

    /// Relayed SDP offer
    SessionOffer(SessionSdpParams),

    /// Relayed SDP answer
    SessionAnswer(SessionSdpParams),

    /// Relayed ICE candidate
    IceCandidate(IceCandidateParams),

    /// A client owned by this (admin) endpoint came online
    ClientOnline(ClientStatusParams),

    /// A client owned by this (admin) endpoint went offline
    ClientOffline(ClientStatusParams),

    /// The underlying WebSocket closed
    Closed,
}

/// WebSocket signaling channel
///
/// One instance per connection attempt; the connection orchestrator owns it
/// for the lifetime of a session.
pub struct SignalingChannel {
    tx: mpsc::UnboundedSender<Message>,
    events: mpsc::UnboundedReceiver<SignalingEvent>,
    endpoint_id: Option<String>,
}

impl SignalingChannel {
    /// Connect to the signaling server
    ///
    /// Establishes the WebSocket connection and starts the background sender
    /// and receiver tasks.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url, "Connecting to signaling server");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();

        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, event_tx));

        Ok(Self {
            tx,
            events,
            endpoint_id: None,
        })
    }

    /// Sender task: forwards messages from the channel to the WebSocket
    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = write.send(msg).await {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }
            if closing {
                break;
            }
        }

        debug!("Signaling sender task terminated");
    }

    /// Receiver task: decodes inbound frames into events
    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        event_tx: mpsc::UnboundedSender<SignalingEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match Self::decode(&text) {
                    Some(event) => {
                        if event_tx.send(event).is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!("Dropping undecodable signaling message: {}", text);
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Signaling connection closed by server");
                    break;
                }
                Err(e) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        let _ = event_tx.send(SignalingEvent::Closed);
        debug!("Signaling receiver task terminated");
    }

    /// Decode one inbound frame
    ///
    /// Frames are JSON-RPC: requests carry `method`, responses `result`,
    /// errors `error`. Anything else is dropped by the caller.
    fn decode(text: &str) -> Option<SignalingEvent> {
        let value: serde_json::Value = serde_json::from_str(text).ok()?;

        if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
            let params = value.get("params").cloned().unwrap_or(serde_json::Value::Null);
            return match method {
                "session.offer" => serde_json::from_value(params)
                    .ok()
                    .map(SignalingEvent::SessionOffer),
                "session.answer" => serde_json::from_value(params)
                    .ok()
                    .map(SignalingEvent::SessionAnswer),
                "session.ice_candidate" => serde_json::from_value(params)
                    .ok()
                    .map(SignalingEvent::IceCandidate),
                "client.online" => serde_json::from_value(params)
                    .ok()
                    .map(SignalingEvent::ClientOnline),
                "client.offline" => serde_json::from_value(params)
                    .ok()
                    .map(SignalingEvent::ClientOffline),
                other => {
                    debug!(method = other, "Ignoring unknown signaling method");
                    None
                }
            };
        }

        if let Some(error) = value.get("error") {
            return Some(SignalingEvent::Error {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0) as i32,
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string(),
                id: value.get("id").cloned().unwrap_or(serde_json::Value::Null),
            });
        }

        if let Some(result) = value.get("result") {
            return Some(SignalingEvent::Response {
                result: result.clone(),
                id: value.get("id").cloned().unwrap_or(serde_json::Value::Null),
            });
        }

        None
    }

    /// Register this endpoint as a member client
    pub fn register_client(&mut self, params: ClientRegisterParams) -> Result<()> {
        self.endpoint_id = Some(params.client_id.clone());
        self.send_message(SignalingMessage::ClientRegister {
            params,
            id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Register this endpoint as an admin
    pub fn register_admin(&mut self, params: AdminRegisterParams) -> Result<()> {
        self.endpoint_id = Some(params.admin_id.clone());
        self.send_message(SignalingMessage::AdminRegister {
            params,
            id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Relay an SDP offer to a remote endpoint
    pub fn send_offer(&self, to: &str, sdp: String) -> Result<()> {
        let from = self.require_endpoint_id()?;
        self.send_message(SignalingMessage::SessionOffer {
            params: SessionSdpParams {
                from,
                to: to.to_string(),
                sdp,
            },
            id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Relay an SDP answer to a remote endpoint
    pub fn send_answer(&self, to: &str, sdp: String) -> Result<()> {
        let from = self.require_endpoint_id()?;
        self.send_message(SignalingMessage::SessionAnswer {
            params: SessionSdpParams {
                from,
                to: to.to_string(),
                sdp,
            },
            id: Some(uuid::Uuid::new_v4().to_string()),
        })
    }

    /// Relay an ICE candidate to a remote endpoint
    pub fn send_ice_candidate(
        &self,
        to: &str,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_m_line_index: Option<u16>,
    ) -> Result<()> {
        let from = self.require_endpoint_id()?;
        self.send_message(SignalingMessage::IceCandidate {
            params: IceCandidateParams {
                from,
                to: to.to_string(),
                candidate,
                sdp_mid,
                sdp_m_line_index,
            },
            // Notification (no response expected)
            id: None,
        })
    }

    /// Notify the server of a deliberate disconnect
    pub fn disconnect(&self, reason: Option<String>) -> Result<()> {
        let client_id = self.require_endpoint_id()?;
        self.send_message(SignalingMessage::ClientDisconnect {
            params: ClientDisconnectParams { client_id, reason },
            id: None,
        })
    }

    /// Deliberately close the channel
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }

    /// Receive the next inbound event
    ///
    /// Returns [`SignalingEvent::Closed`] once and then `None` after the
    /// connection has gone away.
    pub async fn next_event(&mut self) -> Option<SignalingEvent> {
        self.events.recv().await
    }

    /// The identity this channel registered under, if any
    pub fn endpoint_id(&self) -> Option<&str> {
        self.endpoint_id.as_deref()
    }

    fn require_endpoint_id(&self) -> Result<String> {
        self.endpoint_id
            .clone()
            .ok_or_else(|| Error::InvalidData("Endpoint not registered on this channel".to_string()))
    }

    /// Send a signaling message
    fn send_message(&self, msg: SignalingMessage) -> Result<()> {
        let json = msg.to_json()?;
        debug!(method = msg.method_name(), "Sending signaling message");

        self.tx
            .send(Message::Text(json))
            .map_err(|e| Error::SignalingError(format!("Failed to send message: {}", e)))
    }
}
