//! Relay wire types.
//!
//! Every relay frame is a JSON object tagged by `event`:
//!
//! ```text
//! {"event":"join","room":"session-1:ui"}
//! {"event":"offer","description":{"type":"offer","sdp":"v=0 ..."},"room":"session-1:ui"}
//! {"event":"candidate","candidate":{"candidate":"candidate:1 ...","sdpMid":"0"},"room":"..."}
//! ```

use serde::{Deserialize, Serialize};

/// SDP description kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// A session description exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A trickled ICE candidate, in the browser `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Self::default()
        }
    }
}

/// Frames a participant sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RelayCommand {
    /// Join the room, creating it if it does not exist.
    Join { room: String },
    /// Joiner readiness; forwarded to the Creator.
    Ready { room: String },
    Offer {
        description: SessionDescription,
        room: String,
    },
    Answer {
        description: SessionDescription,
        room: String,
    },
    Candidate { candidate: IceCandidate, room: String },
}

impl RelayCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            RelayCommand::Join { .. } => "join",
            RelayCommand::Ready { .. } => "ready",
            RelayCommand::Offer { .. } => "offer",
            RelayCommand::Answer { .. } => "answer",
            RelayCommand::Candidate { .. } => "candidate",
        }
    }

    /// The room the command is addressed to.
    pub fn room(&self) -> &str {
        match self {
            RelayCommand::Join { room }
            | RelayCommand::Ready { room }
            | RelayCommand::Offer { room, .. }
            | RelayCommand::Answer { room, .. }
            | RelayCommand::Candidate { room, .. } => room,
        }
    }
}

/// Frames the relay delivers to a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RelayEvent {
    /// This participant created the room (Creator role).
    Created,
    /// This participant joined an existing room (Joiner role).
    Joined,
    /// The Joiner is ready; delivered to the Creator.
    Ready,
    Offer { description: SessionDescription },
    Answer { description: SessionDescription },
    Candidate { candidate: IceCandidate },
    /// The other participant left the room.
    Disconnected,
    /// The room already has two participants.
    Full,
}

impl RelayEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Created => "created",
            RelayEvent::Joined => "joined",
            RelayEvent::Ready => "ready",
            RelayEvent::Offer { .. } => "offer",
            RelayEvent::Answer { .. } => "answer",
            RelayEvent::Candidate { .. } => "candidate",
            RelayEvent::Disconnected => "disconnected",
            RelayEvent::Full => "full",
        }
    }

    /// Convert a peer's command into the event forwarded to the other participant.
    ///
    /// `join` is answered by the broker itself and has no forwarded form.
    pub fn forwarded(command: RelayCommand) -> Option<Self> {
        match command {
            RelayCommand::Join { .. } => None,
            RelayCommand::Ready { .. } => Some(RelayEvent::Ready),
            RelayCommand::Offer { description, .. } => Some(RelayEvent::Offer { description }),
            RelayCommand::Answer { description, .. } => Some(RelayEvent::Answer { description }),
            RelayCommand::Candidate { candidate, .. } => Some(RelayEvent::Candidate { candidate }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_uses_event_tag() {
        let json = serde_json::to_string(&RelayCommand::Join {
            room: "s1:ui".to_string(),
        })
        .expect("join should serialize");
        assert_eq!(json, r#"{"event":"join","room":"s1:ui"}"#);
    }

    #[test]
    fn offer_carries_typed_description() {
        let cmd = RelayCommand::Offer {
            description: SessionDescription::offer("v=0"),
            room: "r".to_string(),
        };
        let value = serde_json::to_value(&cmd).expect("offer should serialize");
        assert_eq!(value["event"], "offer");
        assert_eq!(value["description"]["type"], "offer");
        assert_eq!(value["description"]["sdp"], "v=0");
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = r#"{"event":"candidate","candidate":{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let event: RelayEvent = serde_json::from_str(json).expect("candidate should parse");
        match event {
            RelayEvent::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert!(candidate.username_fragment.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unit_events_parse_from_bare_tag() {
        let event: RelayEvent =
            serde_json::from_str(r#"{"event":"disconnected"}"#).expect("should parse");
        assert_eq!(event, RelayEvent::Disconnected);
        assert_eq!(event.name(), "disconnected");
    }

    #[test]
    fn forwarding_drops_room_and_join() {
        assert!(RelayEvent::forwarded(RelayCommand::Join {
            room: "r".to_string()
        })
        .is_none());
        assert_eq!(
            RelayEvent::forwarded(RelayCommand::Ready {
                room: "r".to_string()
            }),
            Some(RelayEvent::Ready)
        );
    }
}
