//! Dashboard core
//!
//! Wires the registry, the command facade and the event multiplexer around
//! one process host. The presentation layer talks to this type only.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::detection::LoopDetector;
use crate::host::{CommandFacade, ProcessHost};
use crate::metrics::{FleetTotals, MetricsAggregator, PricingTable};
use crate::mux::{EventMultiplexer, OutputSink, SinkRegistry};
use crate::session::SessionRegistry;
use crate::types::{AgentId, AgentSession, HostEvent, Result, SessionRecord, SonarConfig, SonarError};

use super::{DurationTicker, TickerHandle};

#[derive(Debug)]
pub struct SonarCore {
    registry: Arc<SessionRegistry>,
    facade: CommandFacade,
    multiplexer: Arc<EventMultiplexer>,
    pricing: Arc<PricingTable>,
    config: SonarConfig,
}

impl SonarCore {
    pub fn new(
        registry: Arc<SessionRegistry>,
        host: Arc<dyn ProcessHost>,
        pricing: impl Into<Arc<PricingTable>>,
        config: SonarConfig,
    ) -> Self {
        let pricing = pricing.into();
        let aggregator = MetricsAggregator::new(registry.clone(), pricing.clone());
        let mut multiplexer =
            EventMultiplexer::new(registry.clone(), aggregator, Arc::new(SinkRegistry::new()));
        if config.loop_detection {
            multiplexer = multiplexer.with_loop_detector(Arc::new(LoopDetector::new()));
        }
        let facade = CommandFacade::new(host, registry.clone(), &config);

        Self {
            registry,
            facade,
            multiplexer: Arc::new(multiplexer),
            pricing,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn facade(&self) -> &CommandFacade {
        &self.facade
    }

    pub fn multiplexer(&self) -> &Arc<EventMultiplexer> {
        &self.multiplexer
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    /// Add an idle session column
    pub fn new_session(&self) -> AgentId {
        self.registry.create()
    }

    /// Start `task` on session `id`
    pub async fn start_session(
        &self,
        id: &AgentId,
        task: &str,
        working_dir: &str,
    ) -> Result<AgentSession> {
        self.facade.start(id, task, working_dir).await
    }

    /// Open a shell for session `id` at the configured terminal size
    pub async fn open_shell(&self, id: &AgentId, working_dir: &str) -> Result<()> {
        self.facade
            .spawn_shell(id, working_dir, self.config.pty_rows, self.config.pty_cols)
            .await
    }

    /// Terminate and remove session `id`
    ///
    /// A failing kill does not prevent removal. The sink is released before
    /// the session leaves the registry, so late events find nothing.
    pub async fn close_session(&self, id: &AgentId) -> Option<AgentSession> {
        if !self.registry.contains(id) {
            tracing::debug!(agent_id = %id, "Close for unknown session");
            return None;
        }
        if let Err(e) = self.facade.kill(id).await {
            tracing::debug!(agent_id = %id, error = %e, "Kill during close failed, removing anyway");
        }
        self.multiplexer.release(id);
        let removed = self.registry.remove(id);
        tracing::info!(agent_id = %id, "Session closed");
        removed
    }

    /// Route output of session `id` to `sink`
    pub fn attach_sink(&self, id: &AgentId, sink: Arc<dyn OutputSink>) -> Result<()> {
        if !self.registry.contains(id) {
            return Err(SonarError::session_not_found(id));
        }
        self.multiplexer.sinks().register(id.clone(), sink);
        Ok(())
    }

    /// Start dispatching host events; only the first call has an effect
    pub fn subscribe(&self, events: mpsc::UnboundedReceiver<HostEvent>) -> Option<JoinHandle<()>> {
        self.multiplexer.subscribe(events)
    }

    /// Start the duration ticker at the configured period
    pub fn start_ticker(&self) -> TickerHandle {
        DurationTicker::new(self.registry.clone(), self.config.tick_interval).start()
    }

    pub fn any_active(&self) -> bool {
        self.registry.running_count() > 0
    }

    pub fn totals(&self) -> FleetTotals {
        FleetTotals::from_sessions(&self.registry.list_ordered())
    }

    /// Export records of every session that has started a run
    pub fn records(&self) -> Vec<SessionRecord> {
        self.registry
            .list_ordered()
            .iter()
            .filter_map(SessionRecord::from_session)
            .collect()
    }

    /// Stop event dispatch
    pub fn shutdown(&self) {
        self.multiplexer.shutdown();
    }
}
