//! WebSocket transport for the signaling relay

pub mod handler;
pub mod server;

pub use handler::SharedState;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};
