use std::future::Future;

use tokio::sync::mpsc;

use crate::error::{Result, SignalError};
use crate::message::{RelayCommand, RelayEvent};

/// A connected participant's view of the signaling relay.
///
/// Commands flow out through [`RelaySender`]; relay events are received in order
/// with [`RelayLink::recv`]. Dropping the link disconnects from the relay.
#[derive(Debug)]
pub struct RelayLink {
    sender: RelaySender,
    events: mpsc::UnboundedReceiver<RelayEvent>,
}

/// Cloneable outbound half of a [`RelayLink`].
#[derive(Debug, Clone)]
pub struct RelaySender {
    id: String,
    commands: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayLink {
    /// Assemble a link from its two queues. Used by [`RelayConnector`] implementations.
    pub fn new(
        id: impl Into<String>,
        commands: mpsc::UnboundedSender<RelayCommand>,
        events: mpsc::UnboundedReceiver<RelayEvent>,
    ) -> Self {
        Self {
            sender: RelaySender {
                id: id.into(),
                commands,
            },
            events,
        }
    }

    /// Relay-assigned participant identifier.
    pub fn id(&self) -> &str {
        &self.sender.id
    }

    /// Send a command to the relay.
    pub fn emit(&self, command: RelayCommand) -> Result<()> {
        self.sender.emit(command)
    }

    /// Receive the next relay event. `None` once the relay connection is gone.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }

    /// Split into the outbound sender and the inbound event queue.
    pub fn into_split(self) -> (RelaySender, mpsc::UnboundedReceiver<RelayEvent>) {
        (self.sender, self.events)
    }
}

impl RelaySender {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn emit(&self, command: RelayCommand) -> Result<()> {
        tracing::trace!(
            participant = %self.id,
            event = command.name(),
            room = command.room(),
            "relay emit"
        );
        self.commands
            .send(command)
            .map_err(|_| SignalError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// Something that can open a [`RelayLink`] to a relay endpoint.
pub trait RelayConnector: Send + Sync {
    /// Connect to the relay at `endpoint`.
    ///
    /// Fails with [`SignalError::Connect`] when the relay is unreachable.
    fn connect(&self, endpoint: &str) -> impl Future<Output = Result<RelayLink>> + Send;
}

/// Join a relay base URL and a server path into a single endpoint.
///
/// `relay_endpoint("http://host:4000", "/")` is `http://host:4000/`.
pub fn relay_endpoint(server_url: &str, server_path: &str) -> String {
    let base = server_url.trim_end_matches('/');
    if server_path.starts_with('/') {
        format!("{base}{server_path}")
    } else {
        format!("{base}/{server_path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_default_path() {
        assert_eq!(
            relay_endpoint("http://localhost:4000", "/"),
            "http://localhost:4000/"
        );
    }

    #[test]
    fn endpoint_avoids_double_slash() {
        assert_eq!(
            relay_endpoint("https://relay.example.com/", "/socket.io"),
            "https://relay.example.com/socket.io"
        );
        assert_eq!(
            relay_endpoint("https://relay.example.com", "signal"),
            "https://relay.example.com/signal"
        );
    }

    #[tokio::test]
    async fn emit_after_relay_gone_reports_closed() {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (_evt_tx, evt_rx) = mpsc::unbounded_channel();
        let link = RelayLink::new("p1", cmd_tx, evt_rx);
        drop(cmd_rx);

        let err = link
            .emit(RelayCommand::Join {
                room: "r".to_string(),
            })
            .expect_err("emit should fail");
        assert!(matches!(err, SignalError::Closed));
    }

    #[tokio::test]
    async fn recv_ends_when_relay_drops() {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let mut link = RelayLink::new("p1", cmd_tx, evt_rx);

        evt_tx.send(RelayEvent::Created).expect("send should succeed");
        drop(evt_tx);

        assert_eq!(link.recv().await, Some(RelayEvent::Created));
        assert_eq!(link.recv().await, None);
    }
}
