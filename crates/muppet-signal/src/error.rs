/// Errors that can occur while talking to a signaling relay.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// The relay could not be reached.
    #[error("failed to connect to signaling relay {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The relay endpoint could not be parsed.
    #[error("invalid relay endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The relay link has been closed.
    #[error("signaling link closed")]
    Closed,

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Websocket protocol error.
    #[cfg(feature = "ws")]
    #[error("websocket error: {0}")]
    WebSocket(String),
}

pub type Result<T> = std::result::Result<T, SignalError>;
