//! Replication listeners
//!
//! Sinks that receive the raw AOF bytes appended after the boundary they
//! were registered at.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};

/// A consumer of the live AOF byte stream.
///
/// Called synchronously under the pause lock for every append, in log
/// order; implementations must not block for long. Returning `false`
/// reports the sink as gone, and it is deregistered.
pub trait AofListener: Send + Sync {
    fn on_append(&self, chunk: &Bytes) -> bool;
}

/// Handle identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Registered listeners, keyed by identity
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<ListenerId, Arc<dyn AofListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn AofListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.insert(id, listener);
        id
    }

    /// Returns true if the listener was registered
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Hand one appended chunk to every listener, dropping the ones that
    /// report themselves gone
    pub fn broadcast(&mut self, chunk: &Bytes) {
        self.listeners.retain(|id, listener| {
            let alive = listener.on_append(chunk);
            if !alive {
                tracing::debug!(listener = id.as_u64(), "replication listener gone, deregistering");
            }
            alive
        });
    }
}

/// Listener that forwards chunks over an unbounded channel
pub struct ChannelListener {
    sender: Sender<Bytes>,
}

impl ChannelListener {
    /// Create a listener and the receiving end of its feed
    pub fn new() -> (Arc<Self>, Receiver<Bytes>) {
        let (sender, receiver) = channel::unbounded();
        (Arc::new(Self { sender }), receiver)
    }
}

impl AofListener for ChannelListener {
    fn on_append(&self, chunk: &Bytes) -> bool {
        self.sender.send(chunk.clone()).is_ok()
    }
}
