//! Error types for session coordination

/// Result type alias using the session Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in session coordination
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Session-wide command issued by a peer that is not the host
    #[error("Only the host may {0}")]
    NotHost(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Local capture failed to start or finish
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Receiver never acknowledged a transfer
    #[error("Transfer timeout: {0}")]
    TransferTimeout(String),

    /// Reassembled payload does not match the announced hash
    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Hash announced in the transfer metadata
        expected: String,
        /// Hash computed over the reassembled payload
        actual: String,
    },

    /// Receiver reported a transfer error
    #[error("Transfer rejected by peer: {0}")]
    TransferRejected(String),

    /// Transport could not deliver a message
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal channel closed unexpectedly
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransferTimeout(_)
                | Error::TransportError(_)
                | Error::ChannelClosed(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error reports corrupted transfer content
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Error::IntegrityMismatch { .. } | Error::TransferRejected(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
