use std::time::Duration;

use crate::handshake::{HandshakeEvent, HandshakeState};
use crate::transport::{ChannelState, TransportError};

/// Errors that can occur in peer channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Signaling relay error, including an unreachable relay.
    #[error("signaling error: {0}")]
    Signal(#[from] muppet_signal::SignalError),

    /// Envelope encoding/decoding error.
    #[error("envelope error: {0}")]
    Proto(#[from] muppet_proto::ProtoError),

    /// Platform transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// SDP or ICE application failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The data channel rejected a send.
    #[error("send failed: {0}")]
    SendFailure(String),

    /// No matching response arrived in time.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The channel is not open.
    #[error("channel not open (state: {0})")]
    NotOpen(ChannelState),

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// The handshake received an event that is not valid in its current state.
    #[error("invalid handshake transition: {event} in state {state}")]
    InvalidTransition {
        state: HandshakeState,
        event: HandshakeEvent,
    },

    /// The relay refused to add a third participant to the room.
    #[error("room {0} is full")]
    RoomFull(String),
}

pub type Result<T> = std::result::Result<T, ChannelError>;
