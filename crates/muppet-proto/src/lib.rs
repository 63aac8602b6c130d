//! MUPPET message envelope.
//!
//! Every data-channel message is one JSON envelope carrying:
//! - a unique `id`
//! - a `destination` application (or `*`)
//! - a client-namespaced `eventClass`
//! - an opaque `event` payload
//! - an optional `requestId` linking a response to its request

pub mod envelope;
pub mod error;
pub mod event_class;
pub mod queue;

pub use envelope::{
    decode_message, encode_message, EnvelopeConfig, MessageBuilder, MuppetMessage,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use error::{ProtoError, Result};
pub use event_class::{is_namespaced, is_wildcard, namespaced, sender_of, BROADCAST, WILDCARD};
pub use queue::OutboundQueue;
