/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The frame is not a valid envelope.
    #[error("invalid envelope: {0}")]
    Json(#[from] serde_json::Error),

    /// The encoded envelope exceeds the configured maximum size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
