use std::sync::Arc;

use muppet_signal::{RelayConnector, RelayEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::{PeerChannel, StateCallback};
use crate::config::ChannelConfig;
use crate::error::Result;
use crate::handshake::{Handshake, Step};
use crate::transport::{DataChannelEvent, PeerTransportFactory, TransportEvent};

/// Connect to the relay, join `room`, and return the channel immediately.
///
/// The handshake continues in a background task; sends made before the data
/// channel opens are queued.
pub async fn connect<C, F>(
    connector: &C,
    factory: Arc<F>,
    room: &str,
    config: &ChannelConfig,
) -> Result<PeerChannel>
where
    C: RelayConnector,
    F: PeerTransportFactory + 'static,
{
    connect_with_config(connector, factory, room, config, None).await
}

/// Like [`connect`], reporting every data channel state change to
/// `on_state_change`.
pub async fn connect_with_config<C, F>(
    connector: &C,
    factory: Arc<F>,
    room: &str,
    config: &ChannelConfig,
    on_state_change: Option<StateCallback>,
) -> Result<PeerChannel>
where
    C: RelayConnector,
    F: PeerTransportFactory + 'static,
{
    let endpoint = config.relay_endpoint();
    tracing::debug!(client = %config.client_name, room, endpoint = %endpoint, "connecting to signaling relay");

    let link = connector.connect(&endpoint).await?;
    let (relay, relay_events) = link.into_split();

    let shutdown = CancellationToken::new();
    let channel = PeerChannel::new(room, config, on_state_change, shutdown.clone());

    let mut handshake = Handshake::new(room, config, factory, relay);
    handshake.start()?;

    tokio::spawn(drive(handshake, channel.clone(), relay_events, shutdown));
    Ok(channel)
}

/// Event loop for one channel: relay events, transport events and data
/// channel events, until the relay goes away or the channel is closed.
async fn drive<F>(
    mut handshake: Handshake<F>,
    channel: PeerChannel,
    relay_events: mpsc::UnboundedReceiver<RelayEvent>,
    shutdown: CancellationToken,
) where
    F: PeerTransportFactory + 'static,
{
    let mut relay_events = Some(relay_events);
    let mut transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>> = None;
    let mut channel_events: Option<mpsc::UnboundedReceiver<DataChannelEvent>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(room = handshake.room(), "channel shutdown requested");
                break;
            }
            event = recv_opt(&mut relay_events) => match event {
                Some(event) => match handshake.handle_relay_event(event).await {
                    Step::Continue => channel.set_role(handshake.role()),
                    Step::Transport { events, channel: data_channel } => {
                        channel.set_role(handshake.role());
                        transport_events = Some(events);
                        if let Some(handle) = data_channel {
                            channel_events = Some(channel.attach(handle));
                        }
                    }
                    Step::Close => {
                        channel.close();
                        break;
                    }
                },
                None => {
                    tracing::warn!(room = handshake.room(), "signaling relay connection lost");
                    relay_events = None;
                }
            },
            event = recv_opt(&mut transport_events) => match event {
                Some(TransportEvent::IceCandidate(candidate)) => handshake.local_candidate(candidate),
                Some(TransportEvent::DataChannel(handle)) => {
                    channel_events = Some(channel.attach(handle));
                }
                None => transport_events = None,
            },
            event = recv_opt(&mut channel_events) => match event {
                Some(event) => {
                    match event {
                        DataChannelEvent::Open => handshake.channel_opened(),
                        DataChannelEvent::Closed => handshake.channel_closed(),
                        DataChannelEvent::Message(_) => {}
                    }
                    channel.handle_channel_event(event);
                }
                None => channel_events = None,
            },
        }

        if relay_events.is_none() && transport_events.is_none() && channel_events.is_none() {
            tracing::debug!(room = handshake.room(), "all channel event streams ended");
            break;
        }
    }

    handshake.shutdown().await;
    tracing::debug!(room = handshake.room(), state = %handshake.state(), "channel driver stopped");
}

/// Receive from an optional stream; pending forever when absent.
async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
