//! Platform peer-connection boundary.
//!
//! ICE gathering, SDP generation and the data channel itself are provided by
//! the platform WebRTC stack. The handshake drives it only through these traits.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use muppet_signal::{IceCandidate, SessionDescription};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Lifecycle of a data channel, mirroring the browser `readyState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl ChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelState::Closed => "closed",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a platform transport or data channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The data channel is not open.
    #[error("data channel not open")]
    NotOpen,

    /// The transport or data channel has been closed.
    #[error("transport closed")]
    Closed,

    /// An SDP or ICE operation was rejected.
    #[error("negotiation rejected: {0}")]
    Negotiation(String),

    /// Any other platform failure.
    #[error("{0}")]
    Platform(String),
}

/// Notifications emitted by a data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataChannelEvent {
    Open,
    Message(Bytes),
    Closed,
}

/// The application-level channel produced by negotiation.
pub trait DataChannel: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn ready_state(&self) -> ChannelState;

    /// Queue one text frame for delivery. Fails synchronously if the channel
    /// cannot accept it.
    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    fn close(&self);
}

/// A data channel together with its event stream.
#[derive(Debug)]
pub struct DataChannelHandle {
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::UnboundedReceiver<DataChannelEvent>,
}

impl DataChannelHandle {
    pub fn new(
        channel: Arc<dyn DataChannel>,
        events: mpsc::UnboundedReceiver<DataChannelEvent>,
    ) -> Self {
        Self { channel, events }
    }
}

/// Notifications emitted by a peer transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A local ICE candidate to trickle to the remote side.
    IceCandidate(IceCandidate),
    /// The remote side created a data channel.
    DataChannel(DataChannelHandle),
}

/// One peer connection.
pub trait PeerTransport: Send + Sync {
    fn create_data_channel(
        &self,
        label: &str,
    ) -> impl Future<Output = Result<DataChannelHandle, TransportError>> + Send;

    fn create_offer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn create_answer(
        &self,
    ) -> impl Future<Output = Result<SessionDescription, TransportError>> + Send;

    fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Creates peer transports configured with a set of ICE servers.
pub trait PeerTransportFactory: Send + Sync {
    type Transport: PeerTransport + 'static;

    fn create(
        &self,
        ice_servers: &[String],
    ) -> impl Future<
        Output = Result<
            (Self::Transport, mpsc::UnboundedReceiver<TransportEvent>),
            TransportError,
        >,
    > + Send;
}
