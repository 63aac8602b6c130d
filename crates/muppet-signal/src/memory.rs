//! In-process two-party room broker.
//!
//! Implements the relay protocol without a network: the first participant to
//! `join` a room receives `created`, the second `joined`, any further participant
//! `full`. Every other command is forwarded to the other member of the room, and
//! a participant dropping its link produces `disconnected` for the survivor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::error::{Result, SignalError};
use crate::link::{RelayConnector, RelayLink};
use crate::message::{RelayCommand, RelayEvent};

const MAX_ROOM_MEMBERS: usize = 2;

/// Shared in-memory relay. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<RelayState>,
    unreachable: AtomicBool,
}

#[derive(Debug, Default)]
struct RelayState {
    next_id: u64,
    participants: HashMap<u64, mpsc::UnboundedSender<RelayEvent>>,
    rooms: HashMap<String, Vec<u64>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `connect` calls fail as if the relay were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of participants currently in `room`.
    pub fn room_size(&self, room: &str) -> usize {
        self.lock().rooms.get(room).map_or(0, Vec::len)
    }

    /// Number of connected participants across all rooms.
    pub fn participant_count(&self) -> usize {
        self.lock().participants.len()
    }

    /// Open a link synchronously. Requires a running tokio runtime.
    pub fn connect_link(&self) -> Result<RelayLink> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(SignalError::Connect {
                endpoint: "memory".to_string(),
                reason: "relay unreachable".to_string(),
            });
        }

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<RelayCommand>();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel::<RelayEvent>();

        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.participants.insert(id, evt_tx);
            id
        };

        let relay = self.clone();
        tokio::spawn(async move {
            while let Some(command) = cmd_rx.recv().await {
                relay.route(id, command);
            }
            relay.leave(id);
        });

        tracing::debug!(participant = id, "memory relay participant connected");
        Ok(RelayLink::new(format!("memory-{id}"), cmd_tx, evt_rx))
    }

    fn route(&self, id: u64, command: RelayCommand) {
        let mut state = self.lock();
        match command {
            RelayCommand::Join { room } => state.join(id, room),
            other => state.forward(id, other),
        }
    }

    fn leave(&self, id: u64) {
        let mut state = self.lock();
        state.participants.remove(&id);

        let mut notify = Vec::new();
        state.rooms.retain(|room, members| {
            if let Some(pos) = members.iter().position(|m| *m == id) {
                members.remove(pos);
                tracing::debug!(participant = id, room = %room, "participant left room");
                notify.extend(members.iter().copied());
            }
            !members.is_empty()
        });

        for member in notify {
            state.send(member, RelayEvent::Disconnected);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RelayState {
    fn join(&mut self, id: u64, room: String) {
        let members = self.rooms.entry(room.clone()).or_default();
        if members.contains(&id) {
            tracing::warn!(participant = id, room = %room, "duplicate join ignored");
            return;
        }

        let event = match members.len() {
            0 => RelayEvent::Created,
            n if n < MAX_ROOM_MEMBERS => RelayEvent::Joined,
            _ => RelayEvent::Full,
        };
        if event != RelayEvent::Full {
            members.push(id);
        }
        tracing::debug!(participant = id, room = %room, event = event.name(), "join handled");
        self.send(id, event);
    }

    fn forward(&mut self, id: u64, command: RelayCommand) {
        let room = command.room().to_string();
        let name = command.name();
        let Some(members) = self.rooms.get(&room) else {
            tracing::warn!(participant = id, room = %room, event = name, "command for unknown room dropped");
            return;
        };
        if !members.contains(&id) {
            tracing::warn!(participant = id, room = %room, event = name, "command from non-member dropped");
            return;
        }

        let targets: Vec<u64> = members.iter().copied().filter(|m| *m != id).collect();
        let Some(event) = RelayEvent::forwarded(command) else {
            return;
        };
        for target in targets {
            self.send(target, event.clone());
        }
    }

    fn send(&self, id: u64, event: RelayEvent) {
        if let Some(tx) = self.participants.get(&id) {
            // A closed receiver is cleaned up by that participant's own leave().
            let _ = tx.send(event);
        }
    }
}

impl RelayConnector for MemoryRelay {
    async fn connect(&self, endpoint: &str) -> Result<RelayLink> {
        self.connect_link().map_err(|err| match err {
            SignalError::Connect { reason, .. } => SignalError::Connect {
                endpoint: endpoint.to_string(),
                reason,
            },
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::message::SessionDescription;

    async fn next(link: &mut RelayLink) -> RelayEvent {
        tokio::time::timeout(Duration::from_secs(1), link.recv())
            .await
            .expect("relay event should arrive")
            .expect("relay should still be connected")
    }

    fn join(room: &str) -> RelayCommand {
        RelayCommand::Join {
            room: room.to_string(),
        }
    }

    #[tokio::test]
    async fn first_joiner_creates_second_joins() {
        let relay = MemoryRelay::new();
        let mut a = relay.connect_link().expect("a should connect");
        let mut b = relay.connect_link().expect("b should connect");

        a.emit(join("room")).expect("join should send");
        assert_eq!(next(&mut a).await, RelayEvent::Created);

        b.emit(join("room")).expect("join should send");
        assert_eq!(next(&mut b).await, RelayEvent::Joined);
        assert_eq!(relay.room_size("room"), 2);
    }

    #[tokio::test]
    async fn third_participant_is_told_room_is_full() {
        let relay = MemoryRelay::new();
        let mut a = relay.connect_link().expect("a should connect");
        let mut b = relay.connect_link().expect("b should connect");
        let mut c = relay.connect_link().expect("c should connect");

        a.emit(join("room")).expect("join should send");
        assert_eq!(next(&mut a).await, RelayEvent::Created);
        b.emit(join("room")).expect("join should send");
        assert_eq!(next(&mut b).await, RelayEvent::Joined);
        c.emit(join("room")).expect("join should send");
        assert_eq!(next(&mut c).await, RelayEvent::Full);
        assert_eq!(relay.room_size("room"), 2);
    }

    #[tokio::test]
    async fn commands_are_forwarded_to_the_other_member() {
        let relay = MemoryRelay::new();
        let mut a = relay.connect_link().expect("a should connect");
        let mut b = relay.connect_link().expect("b should connect");

        a.emit(join("room")).expect("join should send");
        next(&mut a).await;
        b.emit(join("room")).expect("join should send");
        next(&mut b).await;

        b.emit(RelayCommand::Ready {
            room: "room".to_string(),
        })
        .expect("ready should send");
        assert_eq!(next(&mut a).await, RelayEvent::Ready);

        a.emit(RelayCommand::Offer {
            description: SessionDescription::offer("sdp-a"),
            room: "room".to_string(),
        })
        .expect("offer should send");
        assert_eq!(
            next(&mut b).await,
            RelayEvent::Offer {
                description: SessionDescription::offer("sdp-a")
            }
        );
    }

    #[tokio::test]
    async fn dropping_a_link_disconnects_the_survivor() {
        let relay = MemoryRelay::new();
        let mut a = relay.connect_link().expect("a should connect");
        let mut b = relay.connect_link().expect("b should connect");

        a.emit(join("room")).expect("join should send");
        next(&mut a).await;
        b.emit(join("room")).expect("join should send");
        next(&mut b).await;

        drop(b);
        assert_eq!(next(&mut a).await, RelayEvent::Disconnected);
        assert_eq!(relay.room_size("room"), 1);
    }

    #[tokio::test]
    async fn unreachable_relay_fails_connect() {
        let relay = MemoryRelay::new();
        relay.set_unreachable(true);
        let err = relay
            .connect("http://relay.invalid/")
            .await
            .expect_err("connect should fail");
        match err {
            SignalError::Connect { endpoint, .. } => {
                assert_eq!(endpoint, "http://relay.invalid/");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
