//! Signaling protocol, client channel and relay server
//!
//! JSON-RPC 2.0 over WebSocket: clients and admins register on a connection,
//! then session offers/answers and ICE candidates are relayed between them
//! by the server.

pub mod client;
pub mod protocol;
pub mod websocket;

pub use client::{SignalingChannel, SignalingEvent};
pub use websocket::{SharedState, WebSocketServerHandle, WebSocketSignalingServer};
