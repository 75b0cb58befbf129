//! agent-sonar
//!
//! Session registry, event multiplexer and metrics aggregator behind a
//! multi-agent terminal dashboard. Each agent session runs a shell or a
//! coding agent in a pseudo-terminal; output, exit, usage and detection
//! events from all sessions arrive on one stream and are folded into
//! per-session state with live cost, token and burn-rate figures.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agent_sonar::{PricingTable, PtyHost, SessionRegistry, SonarConfig, SonarCore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SonarConfig::from_env();
//!     let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//!     let host = Arc::new(PtyHost::new(config.agent_command.clone(), events_tx));
//!     let core = SonarCore::new(
//!         Arc::new(SessionRegistry::new()),
//!         host,
//!         PricingTable::builtin(),
//!         config,
//!     );
//!     core.subscribe(events_rx);
//!
//!     let id = core.new_session();
//!     core.start_session(&id, "fix the failing tests", "~/code/app").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `SONAR_AGENT_COMMAND`: agent executable (default `claude`)
//! - `SONAR_FALLBACK_DIR`: working directory when no home is known (default `/tmp`)
//! - `SONAR_PTY_ROWS` / `SONAR_PTY_COLS`: initial terminal size (default 40x120)
//! - `SONAR_TICK_MS`: duration refresh period (default 1000)
//! - `SONAR_PROJECTS_DIR`: transcript directory to watch
//! - `SONAR_PRICING_FILE`: JSON pricing table replacing the built-in one
//! - `SONAR_LOOP_DETECTION`: `false` disables loop detection on output

pub mod cli;
pub mod collector;
pub mod dashboard;
pub mod detection;
pub mod host;
pub mod metrics;
pub mod mux;
pub mod session;
pub mod telemetry;
pub mod types;

pub use cli::Cli;
pub use dashboard::{SonarCore, run_with_cli};
pub use host::{CommandFacade, ProcessHost, PtyHost};
pub use metrics::{MetricsAggregator, PricingTable};
pub use mux::EventMultiplexer;
pub use session::{RegistryChange, SessionRegistry};
pub use telemetry::shutdown_otel;
pub use types::{AgentId, AgentSession, HostEvent, Result, SessionStatus, SonarConfig, SonarError};
