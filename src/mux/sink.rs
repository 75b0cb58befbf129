//! Per-session output sinks

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::types::AgentId;

/// Destination for the raw terminal output of one session
///
/// Called from the dispatch task; implementations must not block.
pub trait OutputSink: Send + Sync {
    fn write(&self, data: &[u8]);
}

/// Sink forwarding chunks over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl OutputSink for ChannelSink {
    fn write(&self, data: &[u8]) {
        // Receiver gone means nobody is watching this session any more
        drop(self.tx.send(data.to_vec()));
    }
}

/// Concurrent map of sinks keyed by session
#[derive(Default)]
pub struct SinkRegistry {
    sinks: DashMap<AgentId, Arc<dyn OutputSink>>,
}

impl std::fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink, replacing any previous one for the session
    pub fn register(&self, id: AgentId, sink: Arc<dyn OutputSink>) {
        if self.sinks.insert(id.clone(), sink).is_some() {
            tracing::debug!(agent_id = %id, "Replaced output sink");
        }
    }

    /// Drop the sink of a session; `true` if one was registered
    pub fn release(&self, id: &AgentId) -> bool {
        self.sinks.remove(id).is_some()
    }

    /// Write to the sink of a session; `false` if none is registered
    pub fn forward(&self, id: &AgentId, data: &[u8]) -> bool {
        // Clone out of the map so the shard lock is not held during the write
        let Some(sink) = self.sinks.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        sink.write(data);
        true
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.sinks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_to_registered_sink() {
        let sinks = SinkRegistry::new();
        let id = AgentId::from("agent-1");
        let (sink, mut rx) = ChannelSink::new();
        sinks.register(id.clone(), Arc::new(sink));

        assert!(sinks.forward(&id, b"hello"));
        assert_eq!(rx.try_recv().unwrap(), b"hello".to_vec());
        assert!(!sinks.forward(&AgentId::from("agent-2"), b"lost"));
    }

    #[test]
    fn test_release() {
        let sinks = SinkRegistry::new();
        let id = AgentId::from("agent-1");
        let (sink, _rx) = ChannelSink::new();
        sinks.register(id.clone(), Arc::new(sink));
        assert_eq!(sinks.len(), 1);

        assert!(sinks.release(&id));
        assert!(!sinks.release(&id));
        assert!(sinks.is_empty());
        assert!(!sinks.forward(&id, b"late"));
    }

    #[test]
    fn test_closed_receiver_is_tolerated() {
        let sinks = SinkRegistry::new();
        let id = AgentId::from("agent-1");
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sinks.register(id.clone(), Arc::new(sink));
        assert!(sinks.forward(&id, b"nobody listening"));
    }
}
