//! Signaling relay boundary for muppet peer channels.
//!
//! Two participants meet in a named room on a relay, learn their role
//! (`created` or `joined`), and trade SDP descriptions and ICE candidates until
//! a direct data channel exists. This crate models that exchange:
//! - [`RelayCommand`] / [`RelayEvent`] wire frames
//! - [`RelayLink`] and the [`RelayConnector`] trait
//! - [`MemoryRelay`], an in-process two-party broker
//! - `WebSocketConnector` (behind the `ws` feature)

pub mod error;
pub mod link;
pub mod memory;
pub mod message;

#[cfg(feature = "ws")]
pub mod ws;

pub use error::{Result, SignalError};
pub use link::{relay_endpoint, RelayConnector, RelayLink, RelaySender};
pub use memory::MemoryRelay;
pub use message::{IceCandidate, RelayCommand, RelayEvent, SdpType, SessionDescription};

#[cfg(feature = "ws")]
pub use ws::{websocket_url, WebSocketConnector};
