//! Agent transcript line parsing
//!
//! Transcripts are JSONL files; each line is one message envelope.

use serde_json::Value;

use crate::types::TokenUsage;

/// Envelope type of bookkeeping lines that carry no message
const SNAPSHOT_TYPE: &str = "file-history-snapshot";

/// The parts of a transcript line the collector cares about
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptLine {
    /// Envelope type, e.g. `user` or `assistant`
    pub kind: String,
    pub session_id: String,
    pub timestamp: String,
    pub model: Option<String>,
    pub usage: Option<TokenUsage>,
    /// Last text block, or the content itself when it is a plain string
    pub text: Option<String>,
    /// Names of `tool_use` blocks in order
    pub tool_calls: Vec<String>,
}

impl TranscriptLine {
    pub fn is_user(&self) -> bool {
        self.kind == "user"
    }
}

/// Parse one line; `None` for invalid JSON, snapshots and lines without a session
pub fn parse_line(line: &str) -> Option<TranscriptLine> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;

    let kind = value.get("type")?.as_str()?;
    if kind == SNAPSHOT_TYPE {
        return None;
    }

    let session_id = value.get("sessionId").and_then(Value::as_str).unwrap_or("");
    if session_id.is_empty() {
        return None;
    }

    let timestamp = value
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let message = value.get("message");
    let model = message
        .and_then(|m| m.get("model"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let usage = message
        .and_then(|m| m.get("usage"))
        .filter(|u| u.is_object())
        .map(TokenUsage::from_json);

    let mut text = None;
    let mut tool_calls = Vec::new();
    match message.and_then(|m| m.get("content")) {
        Some(Value::Array(blocks)) => {
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(t) = block.get("text").and_then(Value::as_str) {
                            text = Some(t.to_string());
                        }
                    }
                    Some("tool_use") => {
                        if let Some(name) = block.get("name").and_then(Value::as_str) {
                            tool_calls.push(name.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        Some(Value::String(s)) => text = Some(s.clone()),
        _ => {}
    }

    Some(TranscriptLine {
        kind: kind.to_string(),
        session_id: session_id.to_string(),
        timestamp,
        model,
        usage,
        text,
        tool_calls,
    })
}
