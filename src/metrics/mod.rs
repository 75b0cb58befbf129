//! Usage aggregation, pricing and presentation helpers

mod aggregator;
mod format;
mod pricing;
mod summary;

pub use aggregator::{MetricsAggregator, burn_rate};
pub use format::{format_burn_rate, format_cost, format_duration, format_tokens};
pub use pricing::{ModelPricing, PricingTable, PricingTier};
pub use summary::{FleetTotals, TOOL_SUMMARY_LIMIT, session_line, tool_frequencies, tool_summary};
