use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use muppet_proto::MuppetMessage;
use tokio::sync::oneshot;

use crate::error::{ChannelError, Result};

type Settle = oneshot::Sender<Result<MuppetMessage>>;

/// Outstanding requests keyed by request `id`.
///
/// Each entry is a single-use settlement slot. Whoever removes an entry owns
/// its settlement, so a response and a timeout can never both settle the same
/// request.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, Settle>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiver its settlement is delivered on.
    pub fn register(&self, id: &str) -> oneshot::Receiver<Result<MuppetMessage>> {
        let (tx, rx) = oneshot::channel();
        if self.lock().insert(id.to_string(), tx).is_some() {
            tracing::warn!(id, "replaced pending request with duplicate id");
        }
        rx
    }

    /// Settle the request `message` answers.
    ///
    /// Returns the message back when it does not answer a live request.
    pub fn resolve(&self, message: MuppetMessage) -> Option<MuppetMessage> {
        let settle = match message.request_id.as_deref() {
            Some(request_id) => self.lock().remove(request_id),
            None => None,
        };
        match settle {
            Some(tx) => {
                if tx.send(Ok(message)).is_err() {
                    tracing::debug!("response arrived after its request was abandoned");
                }
                None
            }
            None => Some(message),
        }
    }

    /// Remove `id` without settling it. Returns false if it was already gone.
    pub fn remove(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Reject every outstanding request with [`ChannelError::Closed`].
    pub fn reject_all(&self) -> usize {
        let drained: Vec<Settle> = self.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(ChannelError::Closed));
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Settle>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
