//! In-process peer transport.
//!
//! [`MemoryNetwork`] stands in for the platform WebRTC stack. Offers carry the
//! offering transport's id in their SDP; when the Creator applies the Joiner's
//! answer the two transports are paired, the Joiner is handed the far end of
//! the Creator's data channel, and both ends open. Applying a remote answer
//! outside `have-local-offer` fails the way a browser does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use bytes::Bytes;
use muppet_signal::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::mpsc;

use crate::transport::{
    ChannelState, DataChannel, DataChannelEvent, DataChannelHandle, PeerTransport,
    PeerTransportFactory, TransportError, TransportEvent,
};

const SDP_PREFIX: &str = "memory-sdp";

/// Shared in-memory "network" that pairs transports created from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

#[derive(Debug, Default)]
struct NetworkState {
    next_id: u64,
    transports: HashMap<u64, Weak<TransportInner>>,
    data_channels_created: usize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of data channels created locally (by Creators) on this network.
    pub fn data_channels_created(&self) -> usize {
        self.lock().data_channels_created
    }

    /// Number of transports still alive.
    pub fn live_transports(&self) -> usize {
        self.lock()
            .transports
            .values()
            .filter(|t| t.strong_count() > 0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, id: u64) -> Option<Arc<TransportInner>> {
        self.lock().transports.get(&id).and_then(Weak::upgrade)
    }
}

impl PeerTransportFactory for MemoryNetwork {
    type Transport = MemoryTransport;

    async fn create(
        &self,
        _ice_servers: &[String],
    ) -> Result<(MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut net = self.lock();
        net.next_id += 1;
        let inner = Arc::new(TransportInner {
            id: net.next_id,
            events: events_tx,
            state: Mutex::new(TransportState::default()),
        });
        net.transports.insert(inner.id, Arc::downgrade(&inner));
        drop(net);

        Ok((
            MemoryTransport {
                inner,
                network: self.clone(),
            },
            events_rx,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Default)]
struct TransportState {
    signaling: SignalingState,
    remote: Option<SessionDescription>,
    local_channel: Option<Arc<MemoryDataChannel>>,
    remote_candidates: Vec<IceCandidate>,
}

#[derive(Debug)]
struct TransportInner {
    id: u64,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Mutex<TransportState>,
}

impl TransportInner {
    fn lock(&self) -> MutexGuard<'_, TransportState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A simulated peer connection.
#[derive(Debug)]
pub struct MemoryTransport {
    inner: Arc<TransportInner>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Remote candidates applied so far.
    pub fn remote_candidates(&self) -> usize {
        self.inner.lock().remote_candidates.len()
    }

    fn description(&self, sdp_type: SdpType, extra: &str) -> SessionDescription {
        SessionDescription {
            sdp_type,
            sdp: format!("{SDP_PREFIX} id={}{extra}", self.inner.id),
        }
    }

    fn gather_candidate(&self) {
        let candidate = IceCandidate {
            candidate: format!(
                "candidate:{id} 1 udp 2122260223 127.0.0.1 {port} typ host",
                id = self.inner.id,
                port = 40000 + self.inner.id
            ),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        let _ = self.inner.events.send(TransportEvent::IceCandidate(candidate));
    }

    /// Pair with the answering transport and open the data channel on both ends.
    fn connect(&self, answerer_id: u64) -> Result<(), TransportError> {
        let answerer = self.network.lookup(answerer_id).ok_or_else(|| {
            TransportError::Negotiation(format!("unknown remote peer {answerer_id}"))
        })?;

        let Some(local) = self.inner.lock().local_channel.clone() else {
            return Ok(());
        };

        let (remote, remote_events) = MemoryDataChannel::new(local.label());
        local.link(&remote);
        answerer
            .events
            .send(TransportEvent::DataChannel(DataChannelHandle::new(
                remote.clone(),
                remote_events,
            )))
            .map_err(|_| TransportError::Closed)?;
        local.open();
        remote.open();
        Ok(())
    }
}

impl PeerTransport for MemoryTransport {
    async fn create_data_channel(&self, label: &str) -> Result<DataChannelHandle, TransportError> {
        let mut state = self.inner.lock();
        if state.signaling == SignalingState::Closed {
            return Err(TransportError::Closed);
        }
        let (channel, events) = MemoryDataChannel::new(label);
        state.local_channel = Some(channel.clone());
        drop(state);

        self.network.lock().data_channels_created += 1;
        Ok(DataChannelHandle::new(channel, events))
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        match self.inner.lock().signaling {
            SignalingState::Closed => Err(TransportError::Closed),
            _ => Ok(self.description(SdpType::Offer, "")),
        }
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let state = self.inner.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(TransportError::Negotiation(format!(
                "cannot create answer in state {:?}",
                state.signaling
            )));
        }
        let offerer = state
            .remote
            .as_ref()
            .and_then(|d| sdp_id(&d.sdp))
            .unwrap_or_default();
        drop(state);
        Ok(self.description(SdpType::Answer, &format!(" answer-to={offerer}")))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        {
            let mut state = self.inner.lock();
            state.signaling = match (state.signaling, description.sdp_type) {
                (SignalingState::Stable, SdpType::Offer) => SignalingState::HaveLocalOffer,
                (SignalingState::HaveRemoteOffer, SdpType::Answer) => SignalingState::Stable,
                (current, kind) => {
                    return Err(TransportError::Negotiation(format!(
                        "failed to set local {kind:?} sdp: called in wrong state: {current:?}"
                    )))
                }
            };
        }
        self.gather_candidate();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), TransportError> {
        let remote_id = sdp_id(&description.sdp).ok_or_else(|| {
            TransportError::Negotiation("remote sdp is not a memory-network description".to_string())
        })?;

        let connect_to = {
            let mut state = self.inner.lock();
            let (next, connect_to) = match (state.signaling, description.sdp_type) {
                (SignalingState::Stable, SdpType::Offer) => (SignalingState::HaveRemoteOffer, None),
                (SignalingState::HaveLocalOffer, SdpType::Answer) => {
                    (SignalingState::Stable, Some(remote_id))
                }
                (current, kind) => {
                    return Err(TransportError::Negotiation(format!(
                        "failed to set remote {kind:?} sdp: called in wrong state: {current:?}"
                    )))
                }
            };
            state.signaling = next;
            state.remote = Some(description);
            connect_to
        };

        match connect_to {
            Some(answerer) => self.connect(answerer),
            None => Ok(()),
        }
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let mut state = self.inner.lock();
        if state.remote.is_none() {
            return Err(TransportError::Negotiation(
                "remote description not set".to_string(),
            ));
        }
        if candidate.candidate.is_empty() {
            return Err(TransportError::Negotiation("empty candidate".to_string()));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) {
        let channel = {
            let mut state = self.inner.lock();
            state.signaling = SignalingState::Closed;
            state.local_channel.take()
        };
        if let Some(channel) = channel {
            channel.close();
        }
        self.network.lock().transports.remove(&self.inner.id);
    }
}

fn sdp_id(sdp: &str) -> Option<u64> {
    let rest = sdp.strip_prefix(SDP_PREFIX)?;
    rest.split_whitespace()
        .find_map(|field| field.strip_prefix("id="))
        .and_then(|id| id.parse().ok())
}

/// One end of an in-memory data channel.
#[derive(Debug)]
pub struct MemoryDataChannel {
    label: String,
    state: Mutex<ChannelState>,
    events: mpsc::UnboundedSender<DataChannelEvent>,
    peer: Mutex<Weak<MemoryDataChannel>>,
}

impl MemoryDataChannel {
    fn new(label: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<DataChannelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            events: tx,
            peer: Mutex::new(Weak::new()),
        });
        (channel, rx)
    }

    /// Create two connected, open ends. Useful for exercising a channel without negotiation.
    pub fn pair(
        label: &str,
    ) -> (
        DataChannelHandle,
        DataChannelHandle,
    ) {
        let (a, a_events) = Self::new(label);
        let (b, b_events) = Self::new(label);
        a.link(&b);
        a.open();
        b.open();
        (
            DataChannelHandle::new(a, a_events),
            DataChannelHandle::new(b, b_events),
        )
    }

    fn link(self: &Arc<Self>, other: &Arc<Self>) {
        *lock(&self.peer) = Arc::downgrade(other);
        *lock(&other.peer) = Arc::downgrade(self);
    }

    fn open(&self) {
        *lock(&self.state) = ChannelState::Open;
        let _ = self.events.send(DataChannelEvent::Open);
    }

    fn mark_closed(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == ChannelState::Closed {
            return false;
        }
        *state = ChannelState::Closed;
        drop(state);
        let _ = self.events.send(DataChannelEvent::Closed);
        true
    }
}

impl DataChannel for MemoryDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn ready_state(&self) -> ChannelState {
        *lock(&self.state)
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.ready_state() != ChannelState::Open {
            return Err(TransportError::NotOpen);
        }
        let peer = lock(&self.peer).upgrade().ok_or(TransportError::Closed)?;
        peer.events
            .send(DataChannelEvent::Message(Bytes::copy_from_slice(text.as_bytes())))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.mark_closed() {
            let peer = lock(&self.peer).upgrade();
            if let Some(peer) = peer {
                peer.mark_closed();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event should arrive")
            .expect("event stream should be open")
    }

    async fn negotiate(
        network: &MemoryNetwork,
    ) -> (
        MemoryTransport,
        DataChannelHandle,
        MemoryTransport,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let (creator, _creator_events) = network.create(&[]).await.unwrap();
        let (joiner, joiner_events) = network.create(&[]).await.unwrap();

        let channel = creator.create_data_channel("sendDataChannel").await.unwrap();
        let offer = creator.create_offer().await.unwrap();
        creator.set_local_description(offer.clone()).await.unwrap();

        joiner.set_remote_description(offer).await.unwrap();
        let answer = joiner.create_answer().await.unwrap();
        joiner.set_local_description(answer.clone()).await.unwrap();
        creator.set_remote_description(answer).await.unwrap();

        (creator, channel, joiner, joiner_events)
    }

    #[tokio::test]
    async fn answer_pairs_and_opens_both_ends() {
        let network = MemoryNetwork::new();
        let (_creator, mut local, _joiner, mut joiner_events) = negotiate(&network).await;

        assert_eq!(next(&mut local.events).await, DataChannelEvent::Open);

        let mut remote = loop {
            match next(&mut joiner_events).await {
                TransportEvent::DataChannel(handle) => break handle,
                TransportEvent::IceCandidate(_) => continue,
            }
        };
        assert_eq!(remote.channel.label(), "sendDataChannel");
        assert_eq!(next(&mut remote.events).await, DataChannelEvent::Open);

        local.channel.send_text("ping").unwrap();
        assert_eq!(
            next(&mut remote.events).await,
            DataChannelEvent::Message(Bytes::from_static(b"ping"))
        );
        assert_eq!(network.data_channels_created(), 1);
    }

    #[tokio::test]
    async fn second_answer_fails_in_wrong_state() {
        let network = MemoryNetwork::new();
        let (creator, _local, joiner, _events) = negotiate(&network).await;

        let stale = SessionDescription::answer(format!("{SDP_PREFIX} id={}", joiner.id()));
        let err = creator.set_remote_description(stale).await.unwrap_err();
        assert!(matches!(err, TransportError::Negotiation(msg) if msg.contains("wrong state")));
    }

    #[tokio::test]
    async fn candidate_before_remote_description_is_rejected() {
        let network = MemoryNetwork::new();
        let (transport, _events) = network.create(&[]).await.unwrap();
        let err = transport
            .add_ice_candidate(IceCandidate::new("candidate:1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Negotiation(_)));
    }

    #[tokio::test]
    async fn local_description_gathers_a_candidate() {
        let network = MemoryNetwork::new();
        let (transport, mut events) = network.create(&[]).await.unwrap();
        let offer = transport.create_offer().await.unwrap();
        transport.set_local_description(offer).await.unwrap();

        match next(&mut events).await {
            TransportEvent::IceCandidate(c) => assert!(c.candidate.starts_with("candidate:")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_one_end_closes_the_other() {
        let (mut a, mut b) = MemoryDataChannel::pair("x");
        assert_eq!(next(&mut a.events).await, DataChannelEvent::Open);
        assert_eq!(next(&mut b.events).await, DataChannelEvent::Open);

        a.channel.close();
        assert_eq!(next(&mut a.events).await, DataChannelEvent::Closed);
        assert_eq!(next(&mut b.events).await, DataChannelEvent::Closed);
        assert_eq!(b.channel.ready_state(), ChannelState::Closed);
        assert!(matches!(b.channel.send_text("late"), Err(TransportError::NotOpen)));
    }

    #[tokio::test]
    async fn transport_close_unregisters() {
        let network = MemoryNetwork::new();
        let (transport, _events) = network.create(&[]).await.unwrap();
        assert_eq!(network.live_transports(), 1);
        transport.close().await;
        assert_eq!(network.live_transports(), 0);
        assert!(matches!(
            transport.create_offer().await,
            Err(TransportError::Closed)
        ));
    }
}
