use std::time::Duration;

use muppet_proto::EnvelopeConfig;

/// STUN servers used when none are configured.
pub const DEFAULT_ICE_SERVERS: [&str; 2] = [
    "stun:stun1.l.google.com:19302",
    "stun:stun.services.mozilla.com",
];

/// Path appended to the relay URL when none is configured.
pub const DEFAULT_SERVER_PATH: &str = "/";

/// Label of the data channel the Creator opens.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "sendDataChannel";

/// Default `request()` deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a peer channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Name of this application. Prefixes outgoing event classes.
    pub client_name: String,
    /// Base URL of the signaling relay.
    pub server_url: String,
    /// Path appended to `server_url`. Default: `/`.
    pub server_path: String,
    /// ICE server URLs handed to the platform transport.
    pub ice_servers: Vec<String>,
    /// Label of the data channel created by the Creator.
    pub data_channel_label: String,
    /// Deadline for `request()` when none is given.
    pub request_timeout: Duration,
    /// Envelope size limits.
    pub envelope: EnvelopeConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            client_name: "muppet".to_string(),
            server_url: "http://localhost:4000".to_string(),
            server_path: DEFAULT_SERVER_PATH.to_string(),
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            envelope: EnvelopeConfig::default(),
        }
    }
}

impl ChannelConfig {
    pub fn new(client_name: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub fn with_server_path(mut self, path: impl Into<String>) -> Self {
        self.server_path = path.into();
        self
    }

    pub fn with_ice_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.envelope.max_message_size = max;
        self
    }

    /// Relay endpoint: `server_url` joined with `server_path`.
    pub fn relay_endpoint(&self) -> String {
        muppet_signal::relay_endpoint(&self.server_url, &self.server_path)
    }
}
