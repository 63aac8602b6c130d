use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use muppet_proto::{is_wildcard, WILDCARD};

/// Event-class to callback mapping with a reserved `*` key.
///
/// Callbacks are stamped with a registration sequence so that wildcard and
/// class-specific callbacks fire in the order they were registered.
#[derive(Debug)]
pub struct ListenerRegistry<L> {
    inner: Mutex<Entries<L>>,
}

#[derive(Debug)]
struct Entries<L> {
    next_seq: u64,
    by_class: HashMap<String, Vec<(u64, L)>>,
}

impl<L> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Entries {
                next_seq: 0,
                by_class: HashMap::new(),
            }),
        }
    }
}

impl<L: Clone> ListenerRegistry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` for `event_class`. Duplicates are kept.
    pub fn register(&self, event_class: impl Into<String>, listener: L) {
        let mut entries = self.lock();
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries
            .by_class
            .entry(event_class.into())
            .or_default()
            .push((seq, listener));
    }

    /// Callbacks to invoke for a broadcast of `event_class`, in registration order.
    pub fn matching(&self, event_class: &str) -> Vec<L> {
        let entries = self.lock();
        let wildcard = entries.by_class.get(WILDCARD).map(Vec::as_slice).unwrap_or(&[]);
        let specific = if is_wildcard(event_class) {
            &[][..]
        } else {
            entries.by_class.get(event_class).map(Vec::as_slice).unwrap_or(&[])
        };

        let mut merged: Vec<&(u64, L)> = wildcard.iter().chain(specific.iter()).collect();
        merged.sort_by_key(|(seq, _)| *seq);
        merged.into_iter().map(|(_, l)| l.clone()).collect()
    }

    /// Number of callbacks registered for exactly `event_class`.
    pub fn count(&self, event_class: &str) -> usize {
        self.lock().by_class.get(event_class).map_or(0, Vec::len)
    }

    /// Total registered callbacks.
    pub fn len(&self) -> usize {
        self.lock().by_class.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries<L>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_follows_registration_order() {
        let registry = ListenerRegistry::new();
        registry.register("*", "wild-1");
        registry.register("FOO", "foo");
        registry.register("*", "wild-2");

        assert_eq!(registry.matching("FOO"), vec!["wild-1", "foo", "wild-2"]);
        assert_eq!(registry.matching("BAR"), vec!["wild-1", "wild-2"]);
    }

    #[test]
    fn duplicates_fire_twice() {
        let registry = ListenerRegistry::new();
        registry.register("FOO", 7);
        registry.register("FOO", 7);
        assert_eq!(registry.matching("FOO"), vec![7, 7]);
        assert_eq!(registry.count("FOO"), 2);
    }

    #[test]
    fn wildcard_class_fires_wildcard_listeners_once() {
        let registry = ListenerRegistry::new();
        registry.register("*", 1);
        assert_eq!(registry.matching("*"), vec![1]);
    }

    #[test]
    fn unknown_class_without_wildcard_is_empty() {
        let registry: ListenerRegistry<u8> = ListenerRegistry::new();
        registry.register("FOO", 1);
        assert!(registry.matching("BAR").is_empty());
        assert_eq!(registry.len(), 1);
    }
}
