//! Named channels within a session.
//!
//! An application usually opens several channels per session (one per
//! concern). Each lives in the relay room `<session>:<channel>`.
//! [`ChannelRegistry`] serializes their construction behind an async mutex so
//! the same room is never joined twice from one process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use muppet_proto::MuppetMessage;
use muppet_signal::RelayConnector;
use tokio::sync::Mutex;

use crate::channel::{Listener, PeerChannel, StateCallback};
use crate::config::ChannelConfig;
use crate::connector::connect_with_config;
use crate::error::Result;
use crate::transport::PeerTransportFactory;

/// Relay room for `channel_name` within `session_id`.
pub fn room_name(session_id: &str, channel_name: &str) -> String {
    format!("{session_id}:{channel_name}")
}

/// Listeners to wire onto one channel, in registration order.
#[derive(Clone, Default)]
pub struct ChannelListeners {
    entries: Vec<(String, Listener)>,
}

impl ChannelListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(mut self, event_class: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&PeerChannel, &MuppetMessage) + Send + Sync + 'static,
    {
        self.entries.push((event_class.into(), Arc::new(callback)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn apply(&self, channel: &PeerChannel) {
        for (event_class, listener) in &self.entries {
            channel.on_listener(event_class.clone(), Arc::clone(listener));
        }
    }
}

impl fmt::Debug for ChannelListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<&str> = self.entries.iter().map(|(c, _)| c.as_str()).collect();
        f.debug_struct("ChannelListeners")
            .field("event_classes", &classes)
            .finish()
    }
}

/// Owned set of channels keyed by channel name.
pub struct ChannelRegistry<C, F> {
    connector: C,
    factory: Arc<F>,
    config: ChannelConfig,
    on_state_change: Option<StateCallback>,
    channels: Mutex<HashMap<String, PeerChannel>>,
}

impl<C, F> ChannelRegistry<C, F>
where
    C: RelayConnector,
    F: PeerTransportFactory + 'static,
{
    pub fn new(connector: C, factory: F, config: ChannelConfig) -> Self {
        Self {
            connector,
            factory: Arc::new(factory),
            config,
            on_state_change: None,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Report state changes of every channel created from now on.
    pub fn with_state_callback(mut self, callback: StateCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Existing channel `channel_name`, or a new one in room
    /// `<session_id>:<channel_name>`.
    pub async fn get_or_connect(&self, session_id: &str, channel_name: &str) -> Result<PeerChannel> {
        let mut channels = self.channels.lock().await;
        self.ensure(&mut channels, session_id, channel_name).await
    }

    /// Create every missing channel in `listeners`, wire its listeners, and
    /// return the requested channels.
    ///
    /// Channels that already exist are reused; their listeners are added on top
    /// of the ones already registered.
    pub async fn connect_all<I>(
        &self,
        session_id: &str,
        listeners: I,
    ) -> Result<HashMap<String, PeerChannel>>
    where
        I: IntoIterator<Item = (String, ChannelListeners)>,
    {
        let mut channels = self.channels.lock().await;
        let mut connected = HashMap::new();
        for (channel_name, wiring) in listeners {
            let channel = self.ensure(&mut channels, session_id, &channel_name).await?;
            wiring.apply(&channel);
            tracing::debug!(
                session = session_id,
                channel = %channel_name,
                listeners = wiring.len(),
                "channel listeners wired"
            );
            connected.insert(channel_name, channel);
        }
        Ok(connected)
    }

    pub async fn get(&self, channel_name: &str) -> Option<PeerChannel> {
        self.channels.lock().await.get(channel_name).cloned()
    }

    /// Snapshot of all channels.
    pub async fn channels(&self) -> HashMap<String, PeerChannel> {
        self.channels.lock().await.clone()
    }

    /// Forget `channel_name` without closing it.
    pub async fn remove(&self, channel_name: &str) -> Option<PeerChannel> {
        self.channels.lock().await.remove(channel_name)
    }

    /// Close and forget every channel.
    pub async fn close_all(&self) {
        let drained: Vec<(String, PeerChannel)> = self.channels.lock().await.drain().collect();
        for (name, channel) in drained {
            tracing::debug!(channel = %name, room = channel.room(), "closing channel");
            channel.close();
        }
    }

    async fn ensure(
        &self,
        channels: &mut HashMap<String, PeerChannel>,
        session_id: &str,
        channel_name: &str,
    ) -> Result<PeerChannel> {
        if let Some(existing) = channels.get(channel_name) {
            return Ok(existing.clone());
        }
        let room = room_name(session_id, channel_name);
        tracing::info!(client = %self.config.client_name, room = %room, "creating channel");
        let channel = connect_with_config(
            &self.connector,
            Arc::clone(&self.factory),
            &room,
            &self.config,
            self.on_state_change.clone(),
        )
        .await?;
        channels.insert(channel_name.to_string(), channel.clone());
        Ok(channel)
    }
}

impl<C, F> fmt::Debug for ChannelRegistry<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("client", &self.config.client_name)
            .field("server_url", &self.config.server_url)
            .finish_non_exhaustive()
    }
}
