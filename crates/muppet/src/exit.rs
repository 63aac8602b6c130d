use std::fmt;
use std::io;

use muppet_proto::ProtoError;

// Exit codes shared by every subcommand.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
#[cfg_attr(not(feature = "net"), allow(dead_code))]
pub const TRANSPORT_ERROR: i32 = 3;
pub const HEALTH_CHECK_FAILED: i32 = 30;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => DATA_INVALID,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn proto_error(context: &str, err: ProtoError) -> CliError {
    match err {
        ProtoError::Json(_) | ProtoError::MessageTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

#[cfg(feature = "net")]
pub fn signal_error(context: &str, err: muppet_signal::SignalError) -> CliError {
    use muppet_signal::SignalError;

    match err {
        SignalError::InvalidEndpoint { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        SignalError::Connect { .. } | SignalError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        SignalError::Json(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

#[cfg(feature = "net")]
pub fn channel_error(context: &str, err: muppet_peer::ChannelError) -> CliError {
    use muppet_peer::ChannelError;

    match err {
        ChannelError::Signal(err) => signal_error(context, err),
        ChannelError::Proto(err) => proto_error(context, err),
        ChannelError::Transport(_) | ChannelError::Negotiation(_) | ChannelError::SendFailure(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        ChannelError::RequestTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        ChannelError::NotOpen(_) | ChannelError::Closed | ChannelError::RoomFull(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_envelope_is_data_invalid() {
        let err = proto_error("decode failed", ProtoError::MessageTooLarge { size: 10, max: 5 });
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("decode failed: "));
    }

    #[test]
    fn timed_out_io_maps_to_timeout() {
        let err = io_error("stdin", io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(err.code, TIMEOUT);
    }

    #[cfg(feature = "net")]
    #[test]
    fn request_timeout_maps_to_timeout() {
        let err = channel_error(
            "request failed",
            muppet_peer::ChannelError::RequestTimeout(std::time::Duration::from_secs(1)),
        );
        assert_eq!(err.code, TIMEOUT);
    }

    #[cfg(feature = "net")]
    #[test]
    fn unreachable_relay_is_a_plain_failure() {
        let err = channel_error(
            "connect failed",
            muppet_peer::ChannelError::Signal(muppet_signal::SignalError::Connect {
                endpoint: "http://relay.test/".to_string(),
                reason: "refused".to_string(),
            }),
        );
        assert_eq!(err.code, FAILURE);
    }
}
