//! Demultiplexing of host events onto sessions

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::detection::LoopDetector;
use crate::metrics::MetricsAggregator;
use crate::session::SessionRegistry;
use crate::telemetry::ResultTraceExt;
use crate::types::{AgentId, HostEvent, now_millis};

use super::SinkRegistry;

/// Routes host events to the session they are tagged with
///
/// One dispatch task consumes the event stream in arrival order. Events for
/// unknown sessions are dropped.
#[derive(Debug)]
pub struct EventMultiplexer {
    registry: Arc<SessionRegistry>,
    aggregator: MetricsAggregator,
    sinks: Arc<SinkRegistry>,
    detector: Option<Arc<LoopDetector>>,
    subscribed: AtomicBool,
    cancel: CancellationToken,
}

impl EventMultiplexer {
    pub fn new(
        registry: Arc<SessionRegistry>,
        aggregator: MetricsAggregator,
        sinks: Arc<SinkRegistry>,
    ) -> Self {
        Self {
            registry,
            aggregator,
            sinks,
            detector: None,
            subscribed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Feed output chunks to a loop detector
    pub fn with_loop_detector(mut self, detector: Arc<LoopDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    /// Start the dispatch task for `events`
    ///
    /// Only the first call spawns a task; later calls return `None`. The task
    /// ends when the channel closes or [`shutdown`](Self::shutdown) is called.
    pub fn subscribe(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<HostEvent>,
    ) -> Option<JoinHandle<()>> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event stream already subscribed, ignoring");
            return None;
        }

        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        Some(tokio::spawn(async move {
            tracing::debug!("Event dispatch started");
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => this.dispatch(event),
                        None => break,
                    },
                }
            }
            tracing::debug!("Event dispatch stopped");
        }))
    }

    /// Stop the dispatch task
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Dispatch one event at the current time
    pub fn dispatch(&self, event: HostEvent) {
        self.dispatch_at(event, now_millis());
    }

    /// Dispatch one event at `now`
    pub fn dispatch_at(&self, event: HostEvent, now: u64) {
        if !self.registry.contains(event.agent_id()) {
            tracing::debug!(
                agent_id = %event.agent_id(),
                kind = event.kind(),
                "Event for unknown session dropped"
            );
            return;
        }

        match event {
            HostEvent::Output { agent_id, data } => self.on_output(&agent_id, &data),
            HostEvent::Exit { agent_id, code } => self.on_exit(&agent_id, code, now),
            HostEvent::Usage { agent_id, usage } => {
                // Malformed reports are rejected whole and logged
                drop(
                    self.aggregator
                        .apply_usage_at(&agent_id, usage, now)
                        .trace_context(&format!("usage for {agent_id}")),
                );
            }
            HostEvent::Detected { agent_id, task } => {
                if let Some(session) = self.registry.detect(&agent_id, &task, now) {
                    tracing::info!(
                        agent_id = %agent_id,
                        status = %session.status,
                        task = %session.task,
                        "Session detected"
                    );
                }
            }
        }
    }

    fn on_output(&self, id: &AgentId, data: &[u8]) {
        if !self.sinks.forward(id, data) {
            tracing::trace!(agent_id = %id, bytes = data.len(), "No sink, output dropped");
        }

        let Some(detector) = &self.detector else {
            return;
        };
        let burn_rate = self.registry.get(id).map_or(0.0, |s| s.burn_rate);
        let text = String::from_utf8_lossy(data);
        if let Some(alert) = detector.feed(id, &text, burn_rate) {
            match self.registry.flag_anomaly(id, alert.estimated_waste) {
                Ok(_) => tracing::warn!(
                    agent_id = %id,
                    repeat_count = alert.repeat_count,
                    estimated_waste = alert.estimated_waste,
                    pattern = %alert.pattern,
                    "Loop detected"
                ),
                Err(e) => tracing::debug!(agent_id = %id, error = %e, "Loop alert ignored"),
            }
        }
    }

    fn on_exit(&self, id: &AgentId, code: Option<i32>, now: u64) {
        let active = self.registry.status(id).is_some_and(|s| s.is_active());
        if active {
            let result = match code {
                None | Some(0) => self.registry.stop(id, now),
                Some(_) => self.registry.fail(id, now),
            };
            if let Ok(session) = result {
                tracing::info!(
                    agent_id = %id,
                    code = ?code,
                    status = %session.status,
                    duration_ms = session.duration,
                    "Process exited"
                );
            }
        } else {
            tracing::debug!(agent_id = %id, code = ?code, "Exit for inactive session");
        }
        self.release(id);
    }

    /// Drop the sink and detector state of a session
    pub fn release(&self, id: &AgentId) {
        self.sinks.release(id);
        if let Some(detector) = &self.detector {
            detector.reset(id);
        }
    }
}
