use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod decode;
pub mod doctor;
pub mod envelope;
#[cfg(feature = "net")]
pub mod listen;
#[cfg(feature = "net")]
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and print a wire envelope.
    Envelope(EnvelopeArgs),
    /// Parse a wire envelope and print it.
    Decode(DecodeArgs),
    /// Join a room and print received envelopes.
    #[cfg(feature = "net")]
    Listen(ListenArgs),
    /// Join a room and send one envelope.
    #[cfg(feature = "net")]
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run an in-process loopback self-test.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Envelope(args) => envelope::run(args, format),
        Command::Decode(args) => decode::run(args, format),
        #[cfg(feature = "net")]
        Command::Listen(args) => listen::run(args, format),
        #[cfg(feature = "net")]
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct EnvelopeArgs {
    /// Client name used to namespace the event class.
    #[arg(long, env = "MUPPET_CLIENT")]
    pub client: String,
    /// Event class, without the client prefix.
    #[arg(long)]
    pub event_class: String,
    /// JSON event payload.
    #[arg(long, default_value = "null")]
    pub json: String,
    /// Destination application.
    #[arg(long, default_value = "*")]
    pub destination: String,
    /// Mark the envelope as a response to this request id.
    #[arg(long)]
    pub request_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Wire frame to decode. Read from stdin when omitted.
    pub frame: Option<String>,
    /// Maximum accepted frame size in bytes.
    #[arg(long, default_value_t = muppet_proto::DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_size: usize,
}

/// Relay and identity options shared by the networked commands.
#[cfg(feature = "net")]
#[derive(Args, Debug)]
pub struct RelayArgs {
    /// Room to join.
    #[arg(long)]
    pub room: String,
    /// Signaling relay base URL.
    #[arg(long, env = "MUPPET_SERVER_URL", default_value = "http://localhost:4000")]
    pub server: String,
    /// Path appended to the relay URL.
    #[arg(long, default_value = muppet_peer::DEFAULT_SERVER_PATH)]
    pub server_path: String,
    /// Client name used to namespace event classes.
    #[arg(long, env = "MUPPET_CLIENT", default_value = "muppet-cli")]
    pub client: String,
    /// ICE server URL (repeatable). Defaults to public STUN servers.
    #[arg(long = "ice-server", value_name = "URL")]
    pub ice_servers: Vec<String>,
    /// How long to wait for the data channel to open (e.g. 10s, 500ms).
    #[arg(long, default_value = "30s")]
    pub open_timeout: String,
}

#[cfg(feature = "net")]
#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub relay: RelayArgs,
    /// Only print envelopes of this (fully namespaced) event class.
    #[arg(long, default_value = "*")]
    pub event_class: String,
    /// Exit after receiving N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
}

#[cfg(feature = "net")]
#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub relay: RelayArgs,
    /// Event class, without the client prefix.
    #[arg(long)]
    pub event_class: String,
    /// JSON event payload.
    #[arg(long, default_value = "null")]
    pub json: String,
    /// Destination application.
    #[arg(long, default_value = "*")]
    pub destination: String,
    /// Send as a request and print the response.
    #[arg(long)]
    pub wait: bool,
    /// Response deadline when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Per-check deadline (e.g. 2s, 500ms).
    #[arg(long, default_value = "2s")]
    pub timeout: String,
}

/// Parse `5s`, `150ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<std::time::Duration> {
    use std::time::Duration;

    use crate::exit::{CliError, USAGE};

    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Parse a `--json` payload.
pub fn parse_payload(json: &str) -> CliResult<serde_json::Value> {
    serde_json::from_str(json).map_err(|err| {
        crate::exit::CliError::new(crate::exit::USAGE, format!("--json is not valid JSON: {err}"))
    })
}
