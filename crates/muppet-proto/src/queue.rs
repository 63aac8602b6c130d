use std::collections::VecDeque;

use crate::envelope::MuppetMessage;

/// Messages held back until a channel opens.
///
/// Entries are unique by `(event_class, destination)`: pushing a message with a
/// key already present drops the older entry and appends the new one, so a
/// burst of state updates collapses to the latest per key.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<MuppetMessage>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `message`, returning the entry it replaced, if any.
    pub fn push(&mut self, message: MuppetMessage) -> Option<MuppetMessage> {
        let existing = self
            .messages
            .iter()
            .position(|queued| queued.queue_key() == message.queue_key());
        let replaced = existing.and_then(|pos| self.messages.remove(pos));
        self.messages.push_back(message);
        replaced
    }

    /// Take every queued message in order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<MuppetMessage> {
        self.messages.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::envelope::MessageBuilder;

    #[test]
    fn test_same_key_keeps_only_latest() {
        let builder = MessageBuilder::new("app");
        let mut queue = OutboundQueue::new();

        assert!(queue
            .push(builder.build("STATE", json!({"state": "A"}), "peer", None))
            .is_none());
        let replaced = queue.push(builder.build("STATE", json!({"state": "B"}), "peer", None));

        assert_eq!(replaced.map(|m| m.event["state"].clone()), Some(json!("A")));
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event["state"], "B");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_different_destination_is_a_different_key() {
        let builder = MessageBuilder::new("app");
        let mut queue = OutboundQueue::new();

        queue.push(builder.build("STATE", json!(1), "left", None));
        queue.push(builder.build("STATE", json!(2), "right", None));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_replacement_moves_to_back() {
        let builder = MessageBuilder::new("app");
        let mut queue = OutboundQueue::new();

        queue.push(builder.broadcast("A", json!(1)));
        queue.push(builder.broadcast("B", json!(2)));
        queue.push(builder.broadcast("A", json!(3)));

        let order: Vec<_> = queue.drain().into_iter().map(|m| m.event).collect();
        assert_eq!(order, vec![json!(2), json!(3)]);
    }
}
