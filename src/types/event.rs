//! Events delivered by the process host

use serde::{Deserialize, Serialize};

use super::{AgentId, Result, SonarError, TokenUsage};

/// Asynchronous event tagged with the session it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A chunk of terminal output
    Output { agent_id: AgentId, data: Vec<u8> },
    /// The process exited; `code` is absent when it could not be collected
    Exit {
        agent_id: AgentId,
        code: Option<i32>,
    },
    /// Incremental usage report
    Usage {
        agent_id: AgentId,
        usage: UsagePayload,
    },
    /// A session was discovered working on `task`
    Detected { agent_id: AgentId, task: String },
}

impl HostEvent {
    /// Session this event is addressed to
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::Output { agent_id, .. }
            | Self::Exit { agent_id, .. }
            | Self::Usage { agent_id, .. }
            | Self::Detected { agent_id, .. } => agent_id,
        }
    }

    /// Channel name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output { .. } => "output",
            Self::Exit { .. } => "exit",
            Self::Usage { .. } => "usage",
            Self::Detected { .. } => "detected",
        }
    }
}

/// Usage report as received from the host
///
/// Every count is a delta since the previous report for the same session.
/// Counts are signed on the wire so that a misbehaving host can be detected
/// and rejected instead of silently wrapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePayload {
    /// Model name; absent keeps the session's previous model
    #[serde(default)]
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    #[serde(default)]
    pub cache_read_input_tokens: i64,
    #[serde(default)]
    pub cache_creation_input_tokens: i64,
    /// Explicit token total; the category sum is used when absent
    #[serde(default)]
    pub total_tokens: Option<i64>,
    /// Pre-computed cost; computed from pricing when absent
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub message_delta: i64,
    #[serde(default)]
    pub tool_calls: Vec<String>,
}

/// Validated usage increment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageDelta {
    pub model: Option<String>,
    pub tokens: TokenUsage,
    pub total_tokens: u64,
    pub cost: Option<f64>,
    pub messages: u64,
    pub tool_calls: Vec<String>,
}

fn non_negative(name: &str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| SonarError::malformed_usage(format!("{name} is negative ({value})")))
}

impl TryFrom<UsagePayload> for UsageDelta {
    type Error = SonarError;

    fn try_from(payload: UsagePayload) -> Result<Self> {
        let tokens = TokenUsage {
            input_tokens: non_negative("input_tokens", payload.input_tokens)?,
            output_tokens: non_negative("output_tokens", payload.output_tokens)?,
            cache_read_input_tokens: non_negative(
                "cache_read_input_tokens",
                payload.cache_read_input_tokens,
            )?,
            cache_creation_input_tokens: non_negative(
                "cache_creation_input_tokens",
                payload.cache_creation_input_tokens,
            )?,
        };
        let total_tokens = match payload.total_tokens {
            Some(total) => non_negative("total_tokens", total)?,
            None => tokens.total(),
        };
        if let Some(cost) = payload.cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(SonarError::malformed_usage(format!(
                    "cost must be finite and non-negative ({cost})"
                )));
            }
        }
        let messages = non_negative("message_delta", payload.message_delta)?;
        if payload.tool_calls.iter().any(|name| name.trim().is_empty()) {
            return Err(SonarError::malformed_usage("empty tool call name"));
        }
        let model = payload.model.filter(|m| !m.trim().is_empty());

        Ok(Self {
            model,
            tokens,
            total_tokens,
            cost: payload.cost,
            messages,
            tool_calls: payload.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_event_wire_format() {
        let event: HostEvent = serde_json::from_value(json!({
            "type": "usage",
            "agent_id": "agent-2",
            "usage": {
                "model": "claude-sonnet-4",
                "input_tokens": 1000,
                "output_tokens": 500,
                "cost": 0.0105,
                "message_delta": 1,
                "tool_calls": ["Read"]
            }
        }))
        .unwrap();

        assert_eq!(event.agent_id().as_str(), "agent-2");
        assert_eq!(event.kind(), "usage");
        let HostEvent::Usage { usage, .. } = event else {
            panic!("expected usage event");
        };
        assert_eq!(usage.cache_read_input_tokens, 0);
        assert_eq!(usage.tool_calls, vec!["Read".to_string()]);
    }

    #[test]
    fn test_missing_required_counts_fail_to_parse() {
        let result = serde_json::from_value::<UsagePayload>(json!({ "model": "x" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_delta_sums_categories_when_total_absent() {
        let delta = UsageDelta::try_from(UsagePayload {
            input_tokens: 10,
            output_tokens: 20,
            cache_read_input_tokens: 30,
            cache_creation_input_tokens: 40,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(delta.total_tokens, 100);
        assert_eq!(delta.cost, None);
    }

    #[test]
    fn test_delta_rejects_negative_counts() {
        let err = UsageDelta::try_from(UsagePayload {
            input_tokens: 10,
            output_tokens: -1,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SonarError::MalformedUsage(_)));
        assert!(err.to_string().contains("output_tokens"));
    }

    #[test]
    fn test_delta_rejects_bad_cost() {
        for cost in [f64::NAN, f64::INFINITY, -0.5] {
            let result = UsageDelta::try_from(UsagePayload {
                cost: Some(cost),
                ..Default::default()
            });
            assert!(result.is_err(), "cost {cost} should be rejected");
        }
    }

    #[test]
    fn test_blank_model_is_treated_as_absent() {
        let delta = UsageDelta::try_from(UsagePayload {
            model: Some("  ".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(delta.model, None);
    }
}
