use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use muppet_proto::{
    decode_message, encode_message, MessageBuilder, MuppetMessage, OutboundQueue, BROADCAST,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::handshake::Role;
use crate::listeners::ListenerRegistry;
use crate::pending::PendingRequests;
use crate::transport::{ChannelState, DataChannel, DataChannelEvent, DataChannelHandle};

/// Callback invoked for each broadcast message matching its event class.
pub type Listener = Arc<dyn Fn(&PeerChannel, &MuppetMessage) + Send + Sync>;

/// Callback invoked with every channel state transition.
pub type StateCallback = Arc<dyn Fn(ChannelState) + Send + Sync>;

/// A peer channel for one room.
///
/// Cheap to clone; all clones share the same connection. Messages sent before
/// the data channel opens are queued (latest per event class and destination)
/// and flushed on open.
#[derive(Clone)]
pub struct PeerChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    room: String,
    builder: MessageBuilder,
    request_timeout: Duration,
    max_message_size: usize,
    core: Mutex<Core>,
    listeners: ListenerRegistry<Listener>,
    pending: PendingRequests,
    on_state_change: Option<StateCallback>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

struct Core {
    state: ChannelState,
    role: Option<Role>,
    data_channel: Option<Arc<dyn DataChannel>>,
    queue: OutboundQueue,
}

impl PeerChannel {
    pub(crate) fn new(
        room: &str,
        config: &ChannelConfig,
        on_state_change: Option<StateCallback>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                room: room.to_string(),
                builder: MessageBuilder::new(config.client_name.clone()),
                request_timeout: config.request_timeout,
                max_message_size: config.envelope.max_message_size,
                core: Mutex::new(Core {
                    state: ChannelState::Closed,
                    role: None,
                    data_channel: None,
                    queue: OutboundQueue::new(),
                }),
                listeners: ListenerRegistry::new(),
                pending: PendingRequests::new(),
                on_state_change,
                closed: AtomicBool::new(false),
                shutdown,
            }),
        }
    }

    /// True iff the data channel is open.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn state(&self) -> ChannelState {
        self.core().state
    }

    pub fn room(&self) -> &str {
        &self.inner.room
    }

    pub fn client_name(&self) -> &str {
        self.inner.builder.client_name()
    }

    /// Role assigned by the relay, once known.
    pub fn role(&self) -> Option<Role> {
        self.core().role
    }

    /// Requests awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Messages waiting for the channel to open.
    pub fn queued_messages(&self) -> usize {
        self.core().queue.len()
    }

    /// Register `callback` for broadcasts of `event_class` (`*` for all).
    ///
    /// Callbacks fire in registration order; registering the same callback
    /// twice makes it fire twice.
    pub fn on<F>(&self, event_class: impl Into<String>, callback: F)
    where
        F: Fn(&PeerChannel, &MuppetMessage) + Send + Sync + 'static,
    {
        self.on_listener(event_class, Arc::new(callback));
    }

    pub fn on_listener(&self, event_class: impl Into<String>, listener: Listener) {
        self.inner.listeners.register(event_class, listener);
    }

    /// Build an envelope from this client without sending it.
    pub fn build_message(
        &self,
        event_class: &str,
        event: Value,
        destination: &str,
        request_id: Option<&str>,
    ) -> MuppetMessage {
        self.inner
            .builder
            .build(event_class, event, destination, request_id)
    }

    /// Broadcast `event` to every application on the channel.
    ///
    /// Returns false if the message was queued or could not be sent.
    pub fn send(&self, event_class: &str, event: Value) -> bool {
        self.send_to(event_class, event, BROADCAST, None)
    }

    /// Send `event` to `destination`, optionally as a response to `request_id`.
    pub fn send_to(
        &self,
        event_class: &str,
        event: Value,
        destination: &str,
        request_id: Option<&str>,
    ) -> bool {
        let message = self.build_message(event_class, event, destination, request_id);
        self.send_message(message)
    }

    /// Answer `request`.
    pub fn respond(&self, request: &MuppetMessage, event_class: &str, event: Value) -> bool {
        let message = self.inner.builder.response(request, event_class, event);
        self.send_message(message)
    }

    /// Send a prebuilt envelope, queueing it if the channel is not open yet.
    pub fn send_message(&self, message: MuppetMessage) -> bool {
        if self.inner.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                client = self.client_name(),
                room = %self.inner.room,
                event_class = %message.event_class,
                "channel closed, message dropped"
            );
            return false;
        }

        let data_channel = {
            let mut core = self.core();
            match (&core.data_channel, core.state) {
                (Some(dc), ChannelState::Open) => Arc::clone(dc),
                _ => {
                    tracing::debug!(
                        client = self.client_name(),
                        room = %self.inner.room,
                        event_class = %message.event_class,
                        state = %core.state,
                        "channel not ready, message queued"
                    );
                    if let Some(replaced) = core.queue.push(message) {
                        tracing::trace!(id = %replaced.id, "queued message superseded");
                    }
                    return false;
                }
            }
        };

        match self.transmit(data_channel.as_ref(), &message) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    client = self.client_name(),
                    room = %self.inner.room,
                    id = %message.id,
                    error = %err,
                    "failed to send message"
                );
                false
            }
        }
    }

    /// Send a request and wait for the response, using the configured timeout.
    pub async fn request(
        &self,
        event_class: &str,
        event: Value,
        destination: &str,
    ) -> Result<MuppetMessage> {
        self.request_with_timeout(event_class, event, destination, self.inner.request_timeout)
            .await
    }

    /// Send a request and wait up to `timeout` for the message whose
    /// `requestId` matches it.
    ///
    /// Fails immediately with [`ChannelError::NotOpen`] or
    /// [`ChannelError::SendFailure`] if the request cannot be sent, with
    /// [`ChannelError::RequestTimeout`] if no response arrives in time, and with
    /// [`ChannelError::Closed`] if the channel closes first.
    pub async fn request_with_timeout(
        &self,
        event_class: &str,
        event: Value,
        destination: &str,
        timeout: Duration,
    ) -> Result<MuppetMessage> {
        let message = self.build_message(event_class, event, destination, None);
        let id = message.id.clone();

        let mut settled = self.inner.pending.register(&id);
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id: &id,
        };

        if let Err(err) = self.transmit_now(&message) {
            self.inner.pending.remove(&id);
            tracing::debug!(id = %id, error = %err, "request not sent");
            return Err(err);
        }
        tracing::debug!(
            client = self.client_name(),
            room = %self.inner.room,
            id = %id,
            event_class = %message.event_class,
            "request sent"
        );

        match tokio::time::timeout(timeout, &mut settled).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                if self.inner.pending.remove(&id) {
                    tracing::debug!(id = %id, ?timeout, "request timed out");
                    Err(ChannelError::RequestTimeout(timeout))
                } else {
                    // The response claimed the slot first and is about to land.
                    settled.await.unwrap_or(Err(ChannelError::Closed))
                }
            }
        }
    }

    /// Tear down the data channel and stop negotiation.
    ///
    /// Pending requests fail with [`ChannelError::Closed`] and queued messages
    /// are discarded. Closing twice is a no-op.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                client = self.client_name(),
                room = %self.inner.room,
                "no connection to close"
            );
            return;
        }
        self.inner.shutdown.cancel();

        let (data_channel, previous, dropped) = {
            let mut core = self.core();
            let dropped = core.queue.len();
            core.queue.clear();
            (core.data_channel.take(), core.state, dropped)
        };
        if let Some(dc) = data_channel {
            tracing::debug!(client = self.client_name(), room = %self.inner.room, "closing data channel");
            dc.close();
        }

        let rejected = self.inner.pending.reject_all();
        if previous != ChannelState::Closed {
            self.set_state(ChannelState::Closed);
        }
        tracing::info!(
            client = self.client_name(),
            room = %self.inner.room,
            rejected_requests = rejected,
            dropped_messages = dropped,
            "channel closed"
        );
    }

    pub(crate) fn set_role(&self, role: Option<Role>) {
        self.core().role = role;
    }

    /// Adopt a negotiated data channel and return its event stream.
    pub(crate) fn attach(
        &self,
        handle: DataChannelHandle,
    ) -> mpsc::UnboundedReceiver<DataChannelEvent> {
        let DataChannelHandle { channel, events } = handle;
        tracing::debug!(
            client = self.client_name(),
            room = %self.inner.room,
            label = channel.label(),
            "data channel available"
        );
        if self.inner.closed.load(Ordering::SeqCst) {
            channel.close();
        } else {
            self.core().data_channel = Some(channel);
        }
        events
    }

    pub(crate) fn handle_channel_event(&self, event: DataChannelEvent) {
        match event {
            DataChannelEvent::Open => self.handle_state_change(ChannelState::Open),
            DataChannelEvent::Closed => self.handle_state_change(ChannelState::Closed),
            DataChannelEvent::Message(data) => self.handle_message(&data),
        }
    }

    /// Record a data channel state change; flush the queue on entering `open`.
    pub(crate) fn handle_state_change(&self, state: ChannelState) {
        if self.inner.closed.load(Ordering::SeqCst) && state != ChannelState::Closed {
            return;
        }

        let flush = {
            let mut core = self.core();
            let entering_open = state == ChannelState::Open && core.state != ChannelState::Open;
            core.state = state;
            if entering_open {
                core.queue.drain()
            } else {
                Vec::new()
            }
        };
        self.notify_state(state);

        if flush.is_empty() {
            return;
        }
        tracing::debug!(
            client = self.client_name(),
            room = %self.inner.room,
            count = flush.len(),
            "channel now open, sending queued messages"
        );
        for message in flush {
            if let Err(err) = self.transmit_now(&message) {
                tracing::warn!(
                    client = self.client_name(),
                    room = %self.inner.room,
                    id = %message.id,
                    error = %err,
                    "failed to send queued message"
                );
            }
        }
    }

    /// Route one inbound frame: responses settle their request, everything
    /// else fans out to listeners.
    pub(crate) fn handle_message(&self, data: &[u8]) {
        let message = match decode_message(data, self.inner.max_message_size) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(
                    client = self.client_name(),
                    room = %self.inner.room,
                    error = %err,
                    "dropping undecodable message"
                );
                return;
            }
        };
        tracing::debug!(
            client = self.client_name(),
            room = %self.inner.room,
            id = %message.id,
            event_class = %message.event_class,
            request_id = ?message.request_id,
            "message received"
        );

        let Some(message) = self.inner.pending.resolve(message) else {
            return;
        };

        let listeners = self.inner.listeners.matching(&message.event_class);
        if listeners.is_empty() {
            tracing::trace!(event_class = %message.event_class, "no listeners, message dropped");
            return;
        }
        for listener in listeners {
            listener(self, &message);
        }
    }

    fn set_state(&self, state: ChannelState) {
        self.core().state = state;
        self.notify_state(state);
    }

    fn notify_state(&self, state: ChannelState) {
        tracing::info!(
            client = self.client_name(),
            room = %self.inner.room,
            %state,
            "channel state changed"
        );
        if let Some(callback) = &self.inner.on_state_change {
            callback(state);
        }
    }

    /// Send immediately, failing instead of queueing if the channel is not open.
    fn transmit_now(&self, message: &MuppetMessage) -> Result<()> {
        let data_channel = {
            let core = self.core();
            match (&core.data_channel, core.state) {
                (Some(dc), ChannelState::Open) => Arc::clone(dc),
                (_, state) => return Err(ChannelError::NotOpen(state)),
            }
        };
        self.transmit(data_channel.as_ref(), message)
    }

    fn transmit(&self, data_channel: &dyn DataChannel, message: &MuppetMessage) -> Result<()> {
        let text = encode_message(message, self.inner.max_message_size)?;
        tracing::trace!(id = %message.id, len = text.len(), "sending data");
        data_channel
            .send_text(&text)
            .map_err(|err| ChannelError::SendFailure(err.to_string()))
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.inner
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for PeerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("PeerChannel")
            .field("client", &self.client_name())
            .field("room", &self.inner.room)
            .field("state", &core.state)
            .field("role", &core.role)
            .field("queued", &core.queue.len())
            .field("pending", &self.inner.pending.len())
            .field("listeners", &self.inner.listeners.len())
            .finish()
    }
}

/// Drops the pending entry if the request future is abandoned mid-flight.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}
