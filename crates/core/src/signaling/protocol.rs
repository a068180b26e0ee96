//! JSON-RPC 2.0 signaling protocol types

use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Type tag of the admin presence broadcast message
pub const ADMIN_ONLINE_TYPE: &str = "admin-online";

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    pub params: serde_json::Value,

    /// Request ID for matching with response (optional for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: serde_json::Value,

    /// Request ID this response corresponds to
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Coordination-specific error codes

    /// Relay target (client or admin) not found
    pub const TARGET_NOT_FOUND: i32 = -32000;

    /// Sender has not registered on this connection yet
    pub const NOT_REGISTERED: i32 = -32001;

    /// Re-registration attempted to change the client's affiliation
    pub const AFFILIATION_MISMATCH: i32 = -32002;
}

/// Signaling message types
///
/// Typed constructors for the JSON-RPC requests of the coordination
/// protocol; [`to_json`](Self::to_json) and [`from_json`](Self::from_json)
/// go through the full envelope (`jsonrpc`, `method`, `params`, `id`).
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingMessage {
    /// Register a member client under its admin/organization
    ClientRegister {
        /// Request parameters
        params: ClientRegisterParams,
        /// Request ID
        id: Option<String>,
    },

    /// Announce an admin endpoint to the signaling server
    AdminRegister {
        /// Request parameters
        params: AdminRegisterParams,
        /// Request ID
        id: Option<String>,
    },

    /// Relay an SDP offer toward a client or admin
    SessionOffer {
        /// Request parameters
        params: SessionSdpParams,
        /// Request ID
        id: Option<String>,
    },

    /// Relay an SDP answer toward a client or admin
    SessionAnswer {
        /// Request parameters
        params: SessionSdpParams,
        /// Request ID
        id: Option<String>,
    },

    /// Relay an ICE candidate toward a client or admin
    IceCandidate {
        /// Request parameters
        params: IceCandidateParams,
        /// Request ID
        id: Option<String>,
    },

    /// Notify deliberate disconnection
    ClientDisconnect {
        /// Request parameters
        params: ClientDisconnectParams,
        /// Request ID
        id: Option<String>,
    },
}

/// Parameters for client.register
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientRegisterParams {
    /// Unique client identifier (stable per device)
    pub client_id: String,

    /// Owning admin identifier
    pub admin_id: String,

    /// Owning organization identifier
    pub organization_id: String,

    /// Display name shown to the admin
    pub user_name: String,
}

/// Parameters for admin.register
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminRegisterParams {
    /// Unique admin identifier
    pub admin_id: String,

    /// Organization the admin endpoint serves
    pub organization_id: String,
}

/// Parameters for session.offer / session.answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSdpParams {
    /// Sender ID (client or admin)
    pub from: String,

    /// Recipient ID (client or admin)
    pub to: String,

    /// SDP payload
    pub sdp: String,
}

/// Parameters for session.ice_candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IceCandidateParams {
    /// Sender ID
    pub from: String,

    /// Recipient ID
    pub to: String,

    /// ICE candidate string
    pub candidate: String,

    /// SDP media line identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// SDP media line index number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
}

/// Parameters for client.disconnect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientDisconnectParams {
    /// Client ID that is disconnecting
    pub client_id: String,

    /// Optional disconnection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parameters of the client.online / client.offline notifications pushed to
/// the owning admin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientStatusParams {
    /// Client the notification refers to
    pub client_id: String,

    /// Display name (present for client.online)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    /// Epoch milliseconds of the transition
    pub ts: u64,
}

/// Presence broadcast message
///
/// Emitted on the same-device presence bus when an admin endpoint becomes
/// reachable; also the wire shape named in the external interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceMessage {
    /// Type tag, always `admin-online`
    #[serde(rename = "type")]
    pub kind: String,

    /// Epoch milliseconds of the emission
    pub ts: u64,

    /// Organization the admin serves
    pub org_id: String,
}

impl PresenceMessage {
    /// Create an admin-online presence message for an organization
    pub fn admin_online(org_id: impl Into<String>, ts: u64) -> Self {
        Self {
            kind: ADMIN_ONLINE_TYPE.to_string(),
            ts,
            org_id: org_id.into(),
        }
    }

    /// Whether this message announces admin availability for `org_id`
    pub fn matches(&self, org_id: &str) -> bool {
        self.kind == ADMIN_ONLINE_TYPE && self.org_id == org_id
    }
}

impl SignalingMessage {
    /// Encode as a full JSON-RPC request
    pub fn to_json(&self) -> crate::Result<String> {
        let params = match self {
            SignalingMessage::ClientRegister { params, .. } => serde_json::to_value(params),
            SignalingMessage::AdminRegister { params, .. } => serde_json::to_value(params),
            SignalingMessage::SessionOffer { params, .. } => serde_json::to_value(params),
            SignalingMessage::SessionAnswer { params, .. } => serde_json::to_value(params),
            SignalingMessage::IceCandidate { params, .. } => serde_json::to_value(params),
            SignalingMessage::ClientDisconnect { params, .. } => serde_json::to_value(params),
        }
        .map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize signaling params: {}",
                e
            ))
        })?;

        JsonRpcRequest::new(
            self.method_name().to_string(),
            params,
            self.request_id().map(|id| serde_json::Value::String(id.to_string())),
        )
        .to_json()
    }

    /// Parse a JSON-RPC request back into a typed message
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let req = JsonRpcRequest::from_json(json)?;
        let id = req.id.as_ref().and_then(|v| v.as_str()).map(String::from);

        let invalid = |e: serde_json::Error| {
            crate::Error::SerializationError(format!("Invalid {} params: {}", req.method, e))
        };

        match req.method.as_str() {
            "client.register" => Ok(SignalingMessage::ClientRegister {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            "admin.register" => Ok(SignalingMessage::AdminRegister {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            "session.offer" => Ok(SignalingMessage::SessionOffer {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            "session.answer" => Ok(SignalingMessage::SessionAnswer {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            "session.ice_candidate" => Ok(SignalingMessage::IceCandidate {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            "client.disconnect" => Ok(SignalingMessage::ClientDisconnect {
                params: serde_json::from_value(req.params.clone()).map_err(invalid)?,
                id,
            }),
            other => Err(crate::Error::SerializationError(format!(
                "Unknown signaling method: {}",
                other
            ))),
        }
    }

    /// Get the request ID if present
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SignalingMessage::ClientRegister { id, .. }
            | SignalingMessage::AdminRegister { id, .. }
            | SignalingMessage::SessionOffer { id, .. }
            | SignalingMessage::SessionAnswer { id, .. }
            | SignalingMessage::IceCandidate { id, .. }
            | SignalingMessage::ClientDisconnect { id, .. } => id.as_deref(),
        }
    }

    /// Get the method name
    pub fn method_name(&self) -> &str {
        match self {
            SignalingMessage::ClientRegister { .. } => "client.register",
            SignalingMessage::AdminRegister { .. } => "admin.register",
            SignalingMessage::SessionOffer { .. } => "session.offer",
            SignalingMessage::SessionAnswer { .. } => "session.answer",
            SignalingMessage::IceCandidate { .. } => "session.ice_candidate",
            SignalingMessage::ClientDisconnect { .. } => "client.disconnect",
        }
    }
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: String, params: serde_json::Value, id: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method,
            params,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to deserialize JSON-RPC request: {}",
                e
            ))
        })
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC response
    pub fn new(result: serde_json::Value, id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!(
                "Failed to serialize JSON-RPC response: {}",
                e
            ))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: String, id: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: None,
            },
            id,
        }
    }

    /// Create a new JSON-RPC error with data
    pub fn with_data(
        code: i32,
        message: String,
        data: serde_json::Value,
        id: serde_json::Value,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message,
                data: Some(data),
            },
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}

/// Get current Unix timestamp in milliseconds
pub(crate) fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
