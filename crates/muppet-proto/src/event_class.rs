//! Event-class naming.
//!
//! Event classes are dot-namespaced by the sending application:
//! `"viewer.BUTTON_CLICKED"`. The bare wildcard `*` is reserved for listeners
//! that want every broadcast.

/// Listener key matching every non-response inbound message.
pub const WILDCARD: &str = "*";

/// Destination addressing every application on the channel.
pub const BROADCAST: &str = "*";

/// Prefix `event_class` with `client_name` unless it already carries that prefix.
pub fn namespaced(client_name: &str, event_class: &str) -> String {
    if is_namespaced(client_name, event_class) {
        event_class.to_string()
    } else {
        format!("{client_name}.{event_class}")
    }
}

/// Returns true if `event_class` starts with `"{client_name}."`.
pub fn is_namespaced(client_name: &str, event_class: &str) -> bool {
    event_class
        .strip_prefix(client_name)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// Client name that namespaced `event_class`, if it carries one.
pub fn sender_of(event_class: &str) -> Option<&str> {
    event_class
        .split_once('.')
        .map(|(client, _)| client)
        .filter(|client| !client.is_empty())
}

/// Returns true if `key` is the reserved wildcard.
pub fn is_wildcard(key: &str) -> bool {
    key == WILDCARD
}
