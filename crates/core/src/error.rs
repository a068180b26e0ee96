//! Error types for the coordination core

/// Result type alias using the Peerlink Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in coordination operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling connection error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Client not found in the registry
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Admin not found in the directory
    #[error("Admin not found: {0}")]
    AdminNotFound(String),

    /// Registration rejected (e.g. affiliation change on an existing record)
    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    /// Handshake attempt failed
    #[error("Handshake error: {0}")]
    HandshakeError(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Operation timeout
    #[error("Operation timeout: {0}")]
    OperationTimeout(String),

    /// Identity resolution error
    #[error("Identity error: {0}")]
    IdentityError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection attempt cancelled by the caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    ///
    /// Retryable errors feed the orchestrator's backing-off transition;
    /// everything else surfaces to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::HandshakeError(_)
                | Error::OperationTimeout(_)
                | Error::WebSocketError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error is an explicit "absent" lookup result
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ClientNotFound(_) | Error::AdminNotFound(_))
    }
}
