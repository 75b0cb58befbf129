//! Host event routing
//!
//! The multiplexer consumes the event stream of the process host and applies
//! each event to the session it is tagged with. Raw output goes to sinks.

mod multiplexer;
mod sink;

pub use multiplexer::EventMultiplexer;
pub use sink::{ChannelSink, OutputSink, SinkRegistry};
