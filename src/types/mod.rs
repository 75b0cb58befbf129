//! Public types for the session core
//!
//! This module contains all the shared types used across the crate.

mod config;
mod error;
mod event;
mod record;
mod session;

pub use config::{
    DEFAULT_AGENT_COMMAND, DEFAULT_FALLBACK_DIR, DEFAULT_PTY_COLS, DEFAULT_PTY_ROWS,
    DEFAULT_TICK_MS, SonarConfig,
};
pub use error::{ErrorKind, Result, SonarError};
pub use event::{HostEvent, UsageDelta, UsagePayload};
pub use record::SessionRecord;
pub use session::{
    AgentId, AgentSession, SessionPatch, SessionStatus, TokenUsage, Transition, UNKNOWN_MODEL,
    now_millis,
};
