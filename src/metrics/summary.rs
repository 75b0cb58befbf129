//! Summaries derived from session snapshots

use serde::Serialize;

use crate::types::AgentSession;

use super::format::{format_cost, format_duration, format_tokens};

/// Number of distinct tools listed before collapsing into `+k`
pub const TOOL_SUMMARY_LIMIT: usize = 6;

/// Distinct tool names in first-seen order with their call counts
pub fn tool_frequencies(tool_calls: &[String]) -> Vec<(&str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for name in tool_calls {
        match counts.iter_mut().find(|(seen, _)| *seen == name.as_str()) {
            Some((_, count)) => *count += 1,
            None => counts.push((name.as_str(), 1)),
        }
    }
    counts
}

/// One-line tool summary, e.g. `Read ×3 · Edit · Bash ×2 +1`
pub fn tool_summary(tool_calls: &[String]) -> String {
    let counts = tool_frequencies(tool_calls);
    let mut line = counts
        .iter()
        .take(TOOL_SUMMARY_LIMIT)
        .map(|(name, n)| {
            if *n > 1 {
                format!("{name} ×{n}")
            } else {
                (*name).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" · ");
    if counts.len() > TOOL_SUMMARY_LIMIT {
        line.push_str(&format!(" +{}", counts.len() - TOOL_SUMMARY_LIMIT));
    }
    line
}

/// Aggregate figures over all sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FleetTotals {
    pub agents: usize,
    pub running: usize,
    pub total_cost: f64,
    pub total_tokens: u64,
}

impl FleetTotals {
    pub fn from_sessions(sessions: &[AgentSession]) -> Self {
        sessions.iter().fold(Self::default(), |mut acc, s| {
            acc.agents += 1;
            if s.is_active() {
                acc.running += 1;
            }
            acc.total_cost += s.total_cost;
            acc.total_tokens = acc.total_tokens.saturating_add(s.total_tokens);
            acc
        })
    }

    /// `3 agents (1 running) · $0.42 · 12.5k tokens`
    pub fn headline(&self) -> String {
        format!(
            "{} agents ({} running) · {} · {} tokens",
            self.agents,
            self.running,
            format_cost(self.total_cost),
            format_tokens(self.total_tokens)
        )
    }
}

/// Single summary line for one session
pub fn session_line(session: &AgentSession) -> String {
    let mut line = format!(
        "{} [{}] {} · {} · {} · {}",
        session.id,
        session.status,
        session.model,
        format_cost(session.total_cost),
        format_tokens(session.total_tokens),
        format_duration(session.duration),
    );
    if !session.task.is_empty() {
        line.push_str(&format!(" · {}", session.task));
    }
    if !session.tool_calls.is_empty() {
        line.push_str(&format!(" · {}", tool_summary(&session.tool_calls)));
    }
    line
}
