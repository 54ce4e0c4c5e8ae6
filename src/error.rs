// MIT License - Copyright (c) 2026 Peter Wright
// Error taxonomy for the iPano bridge

/// All errors that can occur inside the bridge.
///
/// None of these reach Command API callers directly: the bridge absorbs them
/// at the layer that detects them and reports a `bool` or a log entry.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection timeout after {seconds:.1}s")]
    ConnectTimeout { seconds: f64 },

    #[error("Not connected")]
    NotConnected,

    #[error("Bridge stopped")]
    Stopped,

    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid payload for {message}: {details}")]
    InvalidPayload { message: String, details: String },

    #[error("Invalid argument {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },
}

impl BridgeError {
    /// Whether this error comes from the transport and the connection
    /// should be retried. An address that cannot be used at all is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Io(e) => e.kind() != std::io::ErrorKind::InvalidInput,
            BridgeError::ConnectTimeout { .. } | BridgeError::NotConnected => true,
            _ => false,
        }
    }

    pub(crate) fn invalid_argument(name: &'static str, value: impl ToString) -> Self {
        BridgeError::InvalidArgument {
            name,
            value: value.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
