//! Peer-to-peer messaging between applications over WebRTC data channels.
//!
//! Two applications meet in a named room on a signaling relay, negotiate a
//! direct data channel, and exchange namespaced JSON envelopes over it.
//!
//! # Crate Structure
//!
//! - [`signal`]: relay wire types, connectors and an in-memory relay
//! - [`proto`]: the message envelope, event-class namespacing and the outbound queue
//! - [`peer`]: the handshake and the peer channel engine (behind `peer` feature)

/// Re-export signaling types.
pub mod signal {
    pub use muppet_signal::*;
}

/// Re-export envelope types.
pub mod proto {
    pub use muppet_proto::*;
}

/// Re-export peer channel types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use muppet_peer::*;
}
