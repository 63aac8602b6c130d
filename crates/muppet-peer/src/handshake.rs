//! Room join and SDP/ICE negotiation.
//!
//! The state machine is a pure function, [`transition`], over
//! [`HandshakeState`] and [`HandshakeEvent`]. [`Handshake`] drives it from relay
//! events and performs the matching platform transport calls:
//!
//! ```text
//! Idle --connect--> ConnectedToRelay --join--> Created | Joined
//! Created --ready--> Offering --offer sent--> AwaitingAnswer --answer--> Negotiated
//! Joined --offer / answer sent--> Negotiated
//! Negotiated --data channel open--> ChannelOpen
//! any --disconnected--> Closed
//! ```
//!
//! Negotiation and candidate failures are logged and leave the state unchanged.

use std::fmt;
use std::sync::Arc;

use muppet_signal::{IceCandidate, RelayCommand, RelayEvent, RelaySender, SessionDescription};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::transport::{
    DataChannelHandle, PeerTransport, PeerTransportFactory, TransportEvent,
};

/// Role in a two-party room, assigned by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// First to join; creates the data channel and sends the offer.
    Creator,
    /// Second to join; answers and receives the data channel.
    Joiner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Creator => f.write_str("creator"),
            Role::Joiner => f.write_str("joiner"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeState {
    Idle,
    ConnectedToRelay,
    Created,
    Joined,
    Offering,
    AwaitingAnswer,
    Negotiated,
    ChannelOpen,
    Closed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Idle => "idle",
            HandshakeState::ConnectedToRelay => "connected_to_relay",
            HandshakeState::Created => "created",
            HandshakeState::Joined => "joined",
            HandshakeState::Offering => "offering",
            HandshakeState::AwaitingAnswer => "awaiting_answer",
            HandshakeState::Negotiated => "negotiated",
            HandshakeState::ChannelOpen => "channel_open",
            HandshakeState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// Relay connection established and `join` sent.
    Connect,
    /// Relay assigned the Creator role.
    Created,
    /// Relay assigned the Joiner role.
    Joined,
    /// The Joiner announced readiness.
    PeerReady,
    /// Local offer applied and sent.
    OfferSent,
    /// Remote answer applied.
    AnswerReceived,
    /// Remote offer applied, local answer applied and sent.
    AnswerSent,
    ChannelOpened,
    ChannelClosed,
    /// Relay refused a third participant.
    RoomFull,
    /// The other participant left.
    Disconnected,
    /// Local close.
    Shutdown,
}

impl fmt::Display for HandshakeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeEvent::Connect => "connect",
            HandshakeEvent::Created => "created",
            HandshakeEvent::Joined => "joined",
            HandshakeEvent::PeerReady => "peer_ready",
            HandshakeEvent::OfferSent => "offer_sent",
            HandshakeEvent::AnswerReceived => "answer_received",
            HandshakeEvent::AnswerSent => "answer_sent",
            HandshakeEvent::ChannelOpened => "channel_opened",
            HandshakeEvent::ChannelClosed => "channel_closed",
            HandshakeEvent::RoomFull => "room_full",
            HandshakeEvent::Disconnected => "disconnected",
            HandshakeEvent::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Compute the state following `event`, or reject the event.
pub fn transition(state: HandshakeState, event: HandshakeEvent) -> Result<HandshakeState> {
    use HandshakeEvent as E;
    use HandshakeState as S;

    let next = match (state, event) {
        (_, E::Disconnected) | (_, E::Shutdown) => S::Closed,
        (S::Idle, E::Connect) => S::ConnectedToRelay,
        (S::ConnectedToRelay, E::Created) => S::Created,
        (S::ConnectedToRelay, E::Joined) => S::Joined,
        (S::ConnectedToRelay, E::RoomFull) => S::Closed,
        (S::Created, E::PeerReady) => S::Offering,
        (S::Offering, E::OfferSent) => S::AwaitingAnswer,
        (S::AwaitingAnswer, E::AnswerReceived) => S::Negotiated,
        (S::Joined, E::AnswerSent) => S::Negotiated,
        (S::Negotiated, E::ChannelOpened) => S::ChannelOpen,
        (S::Negotiated | S::ChannelOpen, E::ChannelClosed) => S::Closed,
        (state, event) => return Err(ChannelError::InvalidTransition { state, event }),
    };
    Ok(next)
}

/// What the driver must do after a relay event.
#[derive(Debug)]
pub enum Step {
    /// Nothing further.
    Continue,
    /// A peer transport now exists; poll its events. The Creator also gets its
    /// locally created data channel.
    Transport {
        events: mpsc::UnboundedReceiver<TransportEvent>,
        channel: Option<DataChannelHandle>,
    },
    /// Tear the channel down.
    Close,
}

/// Per-room handshake driver.
pub struct Handshake<F: PeerTransportFactory> {
    room: String,
    client: String,
    label: String,
    ice_servers: Vec<String>,
    factory: Arc<F>,
    relay: RelaySender,
    state: HandshakeState,
    role: Option<Role>,
    transport: Option<Arc<F::Transport>>,
    early_candidates: Vec<IceCandidate>,
}

impl<F: PeerTransportFactory> Handshake<F> {
    pub fn new(room: &str, config: &ChannelConfig, factory: Arc<F>, relay: RelaySender) -> Self {
        Self {
            room: room.to_string(),
            client: config.client_name.clone(),
            label: config.data_channel_label.clone(),
            ice_servers: config.ice_servers.clone(),
            factory,
            relay,
            state: HandshakeState::Idle,
            role: None,
            transport: None,
            early_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Send `join` for the room.
    pub fn start(&mut self) -> Result<()> {
        self.state = transition(self.state, HandshakeEvent::Connect)?;
        tracing::info!(
            client = %self.client,
            room = %self.room,
            participant = self.relay.id(),
            "connected to signaling relay, joining room"
        );
        self.relay.emit(RelayCommand::Join {
            room: self.room.clone(),
        })?;
        Ok(())
    }

    /// Apply one relay event.
    pub async fn handle_relay_event(&mut self, event: RelayEvent) -> Step {
        tracing::debug!(
            client = %self.client,
            room = %self.room,
            event = event.name(),
            state = %self.state,
            "relay event"
        );
        match event {
            RelayEvent::Created => {
                if self.advance(HandshakeEvent::Created) {
                    self.role = Some(Role::Creator);
                    tracing::debug!(client = %self.client, room = %self.room, "created room, waiting for peer");
                }
                Step::Continue
            }
            RelayEvent::Joined => {
                if self.advance(HandshakeEvent::Joined) {
                    self.role = Some(Role::Joiner);
                    tracing::debug!(client = %self.client, room = %self.room, "joined room, sending ready");
                    self.emit(RelayCommand::Ready {
                        room: self.room.clone(),
                    });
                }
                Step::Continue
            }
            RelayEvent::Ready => self.on_peer_ready().await,
            RelayEvent::Offer { description } => self.on_offer(description).await,
            RelayEvent::Answer { description } => {
                self.on_answer(description).await;
                Step::Continue
            }
            RelayEvent::Candidate { candidate } => {
                self.on_remote_candidate(candidate).await;
                Step::Continue
            }
            RelayEvent::Disconnected => {
                tracing::info!(client = %self.client, room = %self.room, "peer disconnected");
                self.advance(HandshakeEvent::Disconnected);
                Step::Close
            }
            RelayEvent::Full => {
                let err = ChannelError::RoomFull(self.room.clone());
                tracing::warn!(client = %self.client, room = %self.room, error = %err, "cannot join room");
                self.advance(HandshakeEvent::RoomFull);
                Step::Close
            }
        }
    }

    /// Trickle a locally gathered candidate to the peer.
    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(RelayCommand::Candidate {
            candidate,
            room: self.room.clone(),
        });
    }

    pub fn channel_opened(&mut self) {
        self.advance(HandshakeEvent::ChannelOpened);
    }

    pub fn channel_closed(&mut self) {
        self.advance(HandshakeEvent::ChannelClosed);
    }

    /// Close the transport and move to `Closed`.
    pub async fn shutdown(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.early_candidates.clear();
        self.advance(HandshakeEvent::Shutdown);
    }

    async fn on_peer_ready(&mut self) -> Step {
        if self.role != Some(Role::Creator) {
            tracing::debug!(client = %self.client, room = %self.room, "not the room creator, ignoring ready");
            return Step::Continue;
        }
        if !self.advance(HandshakeEvent::PeerReady) {
            return Step::Continue;
        }

        let Some((transport, events)) = self.new_transport().await else {
            return Step::Continue;
        };

        let channel = match transport.create_data_channel(&self.label).await {
            Ok(handle) => Some(handle),
            Err(err) => {
                self.negotiation_failed("create data channel", err);
                None
            }
        };

        match self.send_offer(&transport).await {
            Ok(()) => {
                self.advance(HandshakeEvent::OfferSent);
            }
            Err(err) => tracing::warn!(
                client = %self.client,
                room = %self.room,
                error = %err,
                "unable to create offer"
            ),
        }

        Step::Transport { events, channel }
    }

    async fn send_offer(&self, transport: &F::Transport) -> Result<()> {
        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.relay.emit(RelayCommand::Offer {
            description: offer,
            room: self.room.clone(),
        })?;
        Ok(())
    }

    async fn on_offer(&mut self, offer: SessionDescription) -> Step {
        if self.role == Some(Role::Creator) {
            tracing::debug!(client = %self.client, room = %self.room, "room creator ignores offers");
            return Step::Continue;
        }
        if let Err(err) = transition(self.state, HandshakeEvent::AnswerSent) {
            tracing::warn!(client = %self.client, room = %self.room, error = %err, "offer ignored");
            return Step::Continue;
        }

        let Some((transport, events)) = self.new_transport().await else {
            return Step::Continue;
        };

        if let Err(err) = transport.set_remote_description(offer).await {
            self.negotiation_failed("set remote offer", err);
            return Step::Transport {
                events,
                channel: None,
            };
        }
        self.apply_early_candidates(&transport).await;

        match self.send_answer(&transport).await {
            Ok(()) => {
                self.advance(HandshakeEvent::AnswerSent);
            }
            Err(err) => tracing::warn!(
                client = %self.client,
                room = %self.room,
                error = %err,
                "unable to create answer"
            ),
        }

        Step::Transport {
            events,
            channel: None,
        }
    }

    async fn send_answer(&self, transport: &F::Transport) -> Result<()> {
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;
        self.relay.emit(RelayCommand::Answer {
            description: answer,
            room: self.room.clone(),
        })?;
        Ok(())
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        if let Err(err) = transition(self.state, HandshakeEvent::AnswerReceived) {
            tracing::warn!(client = %self.client, room = %self.room, error = %err, "answer ignored");
            return;
        }
        let Some(transport) = self.transport.clone() else {
            tracing::warn!(client = %self.client, room = %self.room, "answer received without a peer connection");
            return;
        };

        match transport.set_remote_description(answer).await {
            Ok(()) => {
                self.advance(HandshakeEvent::AnswerReceived);
                self.apply_early_candidates(&transport).await;
            }
            Err(err) => self.negotiation_failed("set remote answer", err),
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        match self.transport.clone() {
            Some(transport) => self.apply_candidate(&transport, candidate).await,
            None => {
                tracing::debug!(client = %self.client, room = %self.room, "holding candidate until peer connection exists");
                self.early_candidates.push(candidate);
            }
        }
    }

    async fn apply_early_candidates(&mut self, transport: &F::Transport) {
        for candidate in std::mem::take(&mut self.early_candidates) {
            self.apply_candidate(transport, candidate).await;
        }
    }

    async fn apply_candidate(&self, transport: &F::Transport, candidate: IceCandidate) {
        if let Err(err) = transport.add_ice_candidate(candidate).await {
            tracing::warn!(
                client = %self.client,
                room = %self.room,
                error = %err,
                "failed to add candidate"
            );
        }
    }

    async fn new_transport(
        &mut self,
    ) -> Option<(Arc<F::Transport>, mpsc::UnboundedReceiver<TransportEvent>)> {
        match self.factory.create(&self.ice_servers).await {
            Ok((transport, events)) => {
                let transport = Arc::new(transport);
                self.transport = Some(Arc::clone(&transport));
                tracing::debug!(client = %self.client, room = %self.room, "created peer connection");
                Some((transport, events))
            }
            Err(err) => {
                self.negotiation_failed("create peer connection", err);
                None
            }
        }
    }

    fn negotiation_failed(&self, operation: &str, err: impl fmt::Display) {
        let err = ChannelError::Negotiation(format!("{operation}: {err}"));
        tracing::warn!(client = %self.client, room = %self.room, error = %err, "negotiation step failed");
    }

    fn emit(&self, command: RelayCommand) {
        if let Err(err) = self.relay.emit(command) {
            tracing::warn!(client = %self.client, room = %self.room, error = %err, "relay emit failed");
        }
    }

    fn advance(&mut self, event: HandshakeEvent) -> bool {
        match transition(self.state, event) {
            Ok(next) => {
                tracing::trace!(room = %self.room, from = %self.state, to = %next, %event, "handshake transition");
                self.state = next;
                true
            }
            Err(err) => {
                tracing::warn!(client = %self.client, room = %self.room, error = %err, "handshake event rejected");
                false
            }
        }
    }
}

impl<F: PeerTransportFactory> fmt::Debug for Handshake<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handshake")
            .field("room", &self.room)
            .field("client", &self.client)
            .field("state", &self.state)
            .field("role", &self.role)
            .field("has_transport", &self.transport.is_some())
            .field("early_candidates", &self.early_candidates.len())
            .finish()
    }
}
