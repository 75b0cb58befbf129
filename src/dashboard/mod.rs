//! Dashboard core, duration ticker and the binary runner

mod runner;
mod sonar_core;
mod ticker;

pub use runner::{run_with_cli, summary_report, write_export};
pub use sonar_core::SonarCore;
pub use ticker::{DurationTicker, TickerHandle};
