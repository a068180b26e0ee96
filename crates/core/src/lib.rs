//! Peer-presence and connection coordination for Peerlink
//!
//! This crate is the coordination core used to establish and maintain WebRTC
//! links between member clients and an organization's admin endpoint:
//!
//! - **Signaling relay**: JSON-RPC 2.0 over WebSocket brokering session
//!   offers/answers between endpoints that cannot reach each other directly
//! - **Client registry**: server-side bookkeeping of admin/organization
//!   affiliation and liveness, with push notifications to the owning admin
//! - **Presence broadcasting**: same-device announcements that pre-empt
//!   backoff waits when an admin becomes reachable again
//! - **Backoff policy engine**: exponential/linear/fibonacci retry pacing
//!   with jitter, metrics and adaptive resets
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Member client                                           │
//! │  ConnectionOrchestrator                                  │
//! │  ├─ HandshakeDriver (SignalingChannel over WebSocket)    │
//! │  ├─ BackoffPolicy (retry pacing)                         │
//! │  └─ PresenceBus subscription (admin-online pre-emption)  │
//! │      ↓ ws://                                             │
//! │  WebSocketSignalingServer                                │
//! │  ├─ ClientRegistry (liveness + affiliation)              │
//! │  ├─ AdminDirectory (admin transports + owned clients)    │
//! │  └─ QueuedRequestRelay (offline delivery)                │
//! │      ↓ notifications                                     │
//! │  Admin endpoint                                          │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use peerlink_core::{
//!     config::CoordinatorConfig,
//!     connect::{ConnectionOrchestrator, ConnectRequest, StaticNegotiator, WsHandshake},
//!     identity::FileIdentity,
//!     presence::PresenceBus,
//! };
//! use std::sync::Arc;
//!
//! let config = CoordinatorConfig::fast_reconnect_preset("ws://localhost:8080");
//! let driver = Arc::new(WsHandshake::new(
//!     config.clone(),
//!     Arc::new(StaticNegotiator::new("v=0...")),
//! ));
//! let presence = PresenceBus::new(config.presence_capacity);
//!
//! let orchestrator = ConnectionOrchestrator::new(
//!     config,
//!     driver,
//!     Arc::new(FileIdentity::in_default_location()?),
//!     presence,
//! )?;
//!
//! orchestrator.run(ConnectRequest {
//!     session_offer: offer,
//!     client_id: None,
//!     admin_id: "admin-1".into(),
//!     organization_id: "org-1".into(),
//!     user_name: "Alice".into(),
//! }).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod backoff;
pub mod config;
pub mod connect;
pub mod error;
pub mod identity;
pub mod presence;
pub mod registry;
pub mod signaling;

// Re-exports for public API
pub use backoff::{BackoffMetrics, BackoffPolicy};
pub use config::{BackoffConfig, BackoffStrategy, CoordinatorConfig};
pub use connect::{ConnectRequest, ConnectionOrchestrator, ConnectionState};
pub use error::{Error, Result};
pub use presence::{PresenceBroadcaster, PresenceBus};
pub use registry::{ClientRegistry, ClientSnapshot, ClientStatus, ClientSummary};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
