//! Peer channels between two applications.
//!
//! Connect to a signaling relay, meet the other side in a named room, and
//! exchange namespaced JSON envelopes over a direct data channel with
//! broadcast events and correlated request/response.

pub mod channel;
pub mod config;
pub mod connector;
pub mod error;
pub mod handshake;
pub mod listeners;
pub mod memory;
pub mod pending;
pub mod registry;
pub mod transport;

#[cfg(feature = "webrtc")]
pub mod rtc;

pub use channel::{Listener, PeerChannel, StateCallback};
pub use config::{
    ChannelConfig, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_ICE_SERVERS, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SERVER_PATH,
};
pub use connector::{connect, connect_with_config};
pub use error::{ChannelError, Result};
pub use handshake::{transition, Handshake, HandshakeEvent, HandshakeState, Role, Step};
pub use listeners::ListenerRegistry;
pub use memory::{MemoryDataChannel, MemoryNetwork, MemoryTransport};
pub use pending::PendingRequests;
pub use registry::{room_name, ChannelListeners, ChannelRegistry};
pub use transport::{
    ChannelState, DataChannel, DataChannelEvent, DataChannelHandle, PeerTransport,
    PeerTransportFactory, TransportError, TransportEvent,
};

#[cfg(feature = "webrtc")]
pub use rtc::{RtcDataChannel, RtcTransport, RtcTransportFactory};
