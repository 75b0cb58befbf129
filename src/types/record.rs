//! Flat history record handed to the storage collaborator

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::AgentSession;

/// One finished or in-flight run, flattened for export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Run identifier
    pub id: String,
    pub agent_id: String,
    /// Last path component of the working directory
    pub project: String,
    pub model: String,
    pub total_cost: f64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub duration_ms: u64,
    pub status: String,
    pub tool_calls: u32,
    /// RFC 3339
    pub started_at: String,
    pub ended_at: Option<String>,
}

fn rfc3339(millis: u64) -> Option<String> {
    let millis = i64::try_from(millis).ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl SessionRecord {
    /// Flatten a session; `None` if it never started a run
    pub fn from_session(session: &AgentSession) -> Option<Self> {
        if session.started_at == 0 {
            return None;
        }
        let run_id = session
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| format!("{}-{}", session.id, session.started_at));
        let project = session
            .working_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ended_at = if session.is_active() {
            None
        } else {
            rfc3339(session.started_at.saturating_add(session.duration))
        };

        Some(Self {
            id: run_id,
            agent_id: session.id.to_string(),
            project,
            model: session.model.clone(),
            total_cost: session.total_cost,
            total_tokens: session.total_tokens,
            input_tokens: session.input_tokens,
            output_tokens: session.output_tokens,
            cache_read_tokens: session.cache_read_tokens,
            cache_creation_tokens: session.cache_creation_tokens,
            duration_ms: session.duration,
            status: session.status.to_string(),
            tool_calls: u32::try_from(session.tool_calls.len()).unwrap_or(u32::MAX),
            started_at: rfc3339(session.started_at)?,
            ended_at,
        })
    }
}
