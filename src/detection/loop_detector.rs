//! Repeated-output detection per session

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::Serialize;

use crate::types::AgentId;

/// Number of recent chunks kept per session
pub const WINDOW_SIZE: usize = 10;
/// Consecutive similar chunks needed to raise an alert
pub const REPEAT_THRESHOLD: usize = 3;
/// Shorter chunks are ignored
pub const MIN_CHUNK_LENGTH: usize = 50;
/// Positional similarity above which two chunks count as repeats
pub const SIMILARITY_THRESHOLD: f64 = 0.8;
/// Seconds of burn attributed to each repeat
const WASTE_SECONDS_PER_REPEAT: f64 = 30.0;
const PATTERN_PREVIEW_CHARS: usize = 100;

/// Raised when a session keeps producing the same output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoopAlert {
    pub agent_id: AgentId,
    /// Preview of the repeating chunk
    pub pattern: String,
    pub repeat_count: usize,
    /// Projected spend if the loop continues
    pub estimated_waste: f64,
}

#[derive(Debug, Default)]
struct Window {
    chunks: VecDeque<String>,
    alerts: u32,
}

/// Sliding-window loop detector
#[derive(Debug, Default)]
pub struct LoopDetector {
    windows: DashMap<AgentId, Window>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output chunk; returns an alert when a loop is detected
    pub fn feed(&self, agent_id: &AgentId, output: &str, burn_rate: f64) -> Option<LoopAlert> {
        let normalized = normalize(output);
        if normalized.chars().count() < MIN_CHUNK_LENGTH {
            return None;
        }

        let mut window = self.windows.entry(agent_id.clone()).or_default();
        window.chunks.push_back(normalized);
        if window.chunks.len() > WINDOW_SIZE {
            window.chunks.pop_front();
        }
        if window.chunks.len() < REPEAT_THRESHOLD {
            return None;
        }

        let last = window.chunks.back()?;
        let repeat_count = window
            .chunks
            .iter()
            .rev()
            .take_while(|chunk| similarity(chunk, last) > SIMILARITY_THRESHOLD)
            .count();
        if repeat_count < REPEAT_THRESHOLD {
            return None;
        }

        let pattern = preview(last);
        window.alerts += 1;
        let estimated_waste = if burn_rate.is_finite() && burn_rate > 0.0 {
            burn_rate * WASTE_SECONDS_PER_REPEAT * repeat_count as f64
        } else {
            0.0
        };
        tracing::debug!(
            agent_id = %agent_id,
            repeat_count,
            alerts = window.alerts,
            "Repeated output detected"
        );

        Some(LoopAlert {
            agent_id: agent_id.clone(),
            pattern,
            repeat_count,
            estimated_waste,
        })
    }

    /// Forget the window of a session
    pub fn reset(&self, agent_id: &AgentId) {
        self.windows.remove(agent_id);
    }

    /// Whether an alert was raised since the last reset
    pub fn is_looping(&self, agent_id: &AgentId) -> bool {
        self.windows
            .get(agent_id)
            .is_some_and(|window| window.alerts > 0)
    }
}

/// Drop control whitespace (newlines, tabs) but keep spaces; lowercase
fn normalize(output: &str) -> String {
    output
        .chars()
        .filter(|c| !c.is_whitespace() || *c == ' ')
        .collect::<String>()
        .to_lowercase()
}

/// Fraction of positions holding the same char, over the longer length
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 || a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matching = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    matching as f64 / max_len as f64
}

fn preview(s: &str) -> String {
    match s.char_indices().nth(PATTERN_PREVIEW_CHARS) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}
