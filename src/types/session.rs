//! Session entity, status state machine and typed patches

use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Model name reported before any usage event names one
pub const UNKNOWN_MODEL: &str = "unknown";

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Stable identifier of one agent session
///
/// Allocated by the registry, never reused within a process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn from_sequence(n: u64) -> Self {
        Self(format!("agent-{n}"))
    }

    /// Borrow the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&AgentId> for AgentId {
    fn from(id: &AgentId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for AgentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, nothing started yet
    #[default]
    Idle,
    /// A task is running
    Running,
    /// Running, but an anomaly (e.g. a loop) was signalled
    Warning,
    /// Spawn failed or the process exited abnormally
    Error,
    /// The run finished or was stopped
    Completed,
}

/// Named edges of the status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Explicit start of a fresh task
    Start,
    /// Stop requested or process exited cleanly
    Stop,
    /// Spawn failure or abnormal exit
    Fail,
    /// Anomaly collaborator flagged the run
    Anomaly,
    /// Session was discovered running without an explicit start
    Detect,
}

impl Transition {
    /// Verb used in error messages
    pub fn action(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Fail => "fail",
            Self::Anomaly => "flag anomaly",
            Self::Detect => "detect",
        }
    }
}

impl SessionStatus {
    /// Whether a live run backs this session
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Warning)
    }

    /// Target status for `transition`, or `None` if the edge does not exist
    ///
    /// A running (or warning) session cannot be started again because a live
    /// process still backs it.
    pub fn apply(self, transition: Transition) -> Option<Self> {
        use SessionStatus::*;
        match (self, transition) {
            (Idle | Completed | Error, Transition::Start) => Some(Running),
            (Running | Warning, Transition::Stop) => Some(Completed),
            (Running | Warning, Transition::Fail) => Some(Error),
            (Running | Warning, Transition::Anomaly) => Some(Warning),
            (Idle, Transition::Detect) => Some(Running),
            _ => None,
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token counts per pricing category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of input tokens
    pub input_tokens: u64,

    /// Number of output tokens
    pub output_tokens: u64,

    /// Number of tokens read from cache
    #[serde(default)]
    pub cache_read_input_tokens: u64,

    /// Number of tokens written to cache
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl TokenUsage {
    /// Create a new empty token usage
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a transcript `usage` object; absent fields count as zero
    pub fn from_json(usage: &serde_json::Value) -> Self {
        Self {
            input_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["output_tokens"].as_u64().unwrap_or(0),
            cache_read_input_tokens: usage["cache_read_input_tokens"].as_u64().unwrap_or(0),
            cache_creation_input_tokens: usage["cache_creation_input_tokens"]
                .as_u64()
                .unwrap_or(0),
        }
    }

    /// Add another usage to this one
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.cache_read_input_tokens = self
            .cache_read_input_tokens
            .saturating_add(other.cache_read_input_tokens);
        self.cache_creation_input_tokens = self
            .cache_creation_input_tokens
            .saturating_add(other.cache_creation_input_tokens);
    }

    /// Sum over all four categories
    pub fn total(&self) -> u64 {
        self.input_tokens
            .saturating_add(self.output_tokens)
            .saturating_add(self.cache_read_input_tokens)
            .saturating_add(self.cache_creation_input_tokens)
    }

    /// Check if any tokens were used
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// One tracked agent column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: AgentId,
    pub task: String,
    pub working_dir: PathBuf,
    pub status: SessionStatus,
    pub model: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub message_count: u64,
    pub tool_calls: Vec<String>,
    /// Epoch millis of the latest transition into `running`, 0 if never started
    pub started_at: u64,
    /// Elapsed millis, frozen once the run ends
    pub duration: u64,
    /// Cost per second since `started_at`
    pub burn_rate: f64,
    pub is_looping: bool,
    pub estimated_savings: f64,
    /// Identifier of the current run, assigned on every explicit start
    pub run_id: Option<Uuid>,
}

impl AgentSession {
    /// Fresh idle session
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            task: String::new(),
            working_dir: PathBuf::new(),
            status: SessionStatus::Idle,
            model: UNKNOWN_MODEL.to_string(),
            total_cost: 0.0,
            total_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            message_count: 0,
            tool_calls: Vec::new(),
            started_at: 0,
            duration: 0,
            burn_rate: 0.0,
            is_looping: false,
            estimated_savings: 0.0,
            run_id: None,
        }
    }

    /// Whether a live run backs this session
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Per-category token totals
    pub fn token_usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_input_tokens: self.cache_read_tokens,
            cache_creation_input_tokens: self.cache_creation_tokens,
        }
    }

    /// Reset every accumulator for a fresh explicit run
    pub(crate) fn begin_run(&mut self, task: String, working_dir: PathBuf, now: u64) {
        self.task = task;
        self.working_dir = working_dir;
        self.status = SessionStatus::Running;
        self.started_at = now;
        self.total_cost = 0.0;
        self.total_tokens = 0;
        self.input_tokens = 0;
        self.output_tokens = 0;
        self.cache_read_tokens = 0;
        self.cache_creation_tokens = 0;
        self.message_count = 0;
        self.tool_calls.clear();
        self.duration = 0;
        self.burn_rate = 0.0;
        self.is_looping = false;
        self.estimated_savings = 0.0;
        self.run_id = Some(Uuid::new_v4());
    }

    /// Elapsed millis for derived metrics
    ///
    /// Active sessions measure against `now`; finished ones keep their frozen
    /// duration. Clock skew clamps to zero.
    pub fn elapsed_at(&self, now: u64) -> u64 {
        if self.started_at == 0 {
            return 0;
        }
        if self.is_active() {
            now.saturating_sub(self.started_at)
        } else {
            self.duration
        }
    }
}

/// Partial update of a session
///
/// Only `Some` fields change. Applied through [`SessionPatch::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub task: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub status: Option<SessionStatus>,
    pub model: Option<String>,
    pub total_cost: Option<f64>,
    pub total_tokens: Option<u64>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    pub message_count: Option<u64>,
    pub tool_calls: Option<Vec<String>>,
    pub started_at: Option<u64>,
    pub duration: Option<u64>,
    pub burn_rate: Option<f64>,
    pub is_looping: Option<bool>,
    pub estimated_savings: Option<f64>,
}

impl SessionPatch {
    /// Patch that changes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the patch to `session`, returning the merged value
    pub fn merge(self, mut session: AgentSession) -> AgentSession {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = self.$field { session.$field = v; })*
            };
        }
        take!(
            task,
            working_dir,
            status,
            model,
            total_cost,
            total_tokens,
            input_tokens,
            output_tokens,
            cache_read_tokens,
            cache_creation_tokens,
            message_count,
            tool_calls,
            started_at,
            duration,
            burn_rate,
            is_looping,
            estimated_savings,
        );
        session
    }
}
