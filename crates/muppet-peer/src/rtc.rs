//! webrtc-rs adapter for the transport traits.

use std::fmt;
use std::sync::Arc;

use muppet_signal::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::mpsc;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::transport::{
    ChannelState, DataChannel, DataChannelEvent, DataChannelHandle, PeerTransport,
    PeerTransportFactory, TransportError, TransportEvent,
};

/// Builds webrtc-rs peer connections.
#[derive(Clone)]
pub struct RtcTransportFactory {
    api: Arc<API>,
}

impl RtcTransportFactory {
    pub fn new() -> Self {
        Self {
            api: Arc::new(APIBuilder::new().build()),
        }
    }
}

impl Default for RtcTransportFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RtcTransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcTransportFactory").finish_non_exhaustive()
    }
}

impl PeerTransportFactory for RtcTransportFactory {
    type Transport = RtcTransport;

    async fn create(
        &self,
        ice_servers: &[String],
    ) -> Result<(RtcTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(platform)?,
        );
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    tracing::trace!("ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = tx.send(TransportEvent::IceCandidate(from_init(init)));
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to serialize local candidate"),
                }
            })
        }));

        let channel_tx = events_tx;
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let tx = channel_tx.clone();
            Box::pin(async move {
                tracing::debug!(label = dc.label(), "remote data channel announced");
                let _ = tx.send(TransportEvent::DataChannel(wire_data_channel(dc)));
            })
        }));

        Ok((RtcTransport { pc }, events_rx))
    }
}

/// One webrtc-rs peer connection.
pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

impl fmt::Debug for RtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcTransport").finish_non_exhaustive()
    }
}

impl PeerTransport for RtcTransport {
    async fn create_data_channel(&self, label: &str) -> Result<DataChannelHandle, TransportError> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(platform)?;
        Ok(wire_data_channel(dc))
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation)?;
        to_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation)?;
        to_description(answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_local_description(from_description(description)?)
            .await
            .map_err(negotiation)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(from_description(description)?)
            .await
            .map_err(negotiation)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(negotiation)
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            tracing::debug!(error = %err, "peer connection close failed");
        }
    }
}

/// A webrtc-rs data channel. Sends are handed to a writer task so that
/// `send_text` stays synchronous and ordered.
pub struct RtcDataChannel {
    dc: Arc<RTCDataChannel>,
    outbound: mpsc::UnboundedSender<String>,
}

impl fmt::Debug for RtcDataChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtcDataChannel")
            .field("label", &self.dc.label())
            .field("state", &self.dc.ready_state())
            .finish()
    }
}

impl DataChannel for RtcDataChannel {
    fn label(&self) -> &str {
        self.dc.label()
    }

    fn ready_state(&self) -> ChannelState {
        match self.dc.ready_state() {
            RTCDataChannelState::Open => ChannelState::Open,
            RTCDataChannelState::Connecting => ChannelState::Connecting,
            RTCDataChannelState::Closing => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.dc.ready_state() != RTCDataChannelState::Open {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(text.to_string())
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let dc = Arc::clone(&self.dc);
        tokio::spawn(async move {
            if let Err(err) = dc.close().await {
                tracing::debug!(error = %err, "data channel close failed");
            }
        });
    }
}

fn wire_data_channel(dc: Arc<RTCDataChannel>) -> DataChannelHandle {
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let open_tx = events_tx.clone();
    dc.on_open(Box::new(move || {
        let _ = open_tx.send(DataChannelEvent::Open);
        Box::pin(async {})
    }));

    let close_tx = events_tx.clone();
    dc.on_close(Box::new(move || {
        let _ = close_tx.send(DataChannelEvent::Closed);
        Box::pin(async {})
    }));

    let message_tx = events_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let _ = message_tx.send(DataChannelEvent::Message(msg.data));
        Box::pin(async {})
    }));

    if dc.ready_state() == RTCDataChannelState::Open {
        let _ = events_tx.send(DataChannelEvent::Open);
    }

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let writer = Arc::clone(&dc);
    tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if let Err(err) = writer.send_text(text).await {
                tracing::warn!(label = writer.label(), error = %err, "data channel write failed");
            }
        }
    });

    DataChannelHandle::new(Arc::new(RtcDataChannel { dc, outbound }), events_rx)
}

fn to_description(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => {
            return Err(TransportError::Negotiation(format!(
                "unsupported sdp type {other}"
            )))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn from_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(TransportError::Negotiation(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    }
    .map_err(negotiation)
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn platform(err: webrtc::Error) -> TransportError {
    TransportError::Platform(err.to_string())
}

fn negotiation(err: webrtc::Error) -> TransportError {
    TransportError::Negotiation(err.to_string())
}
