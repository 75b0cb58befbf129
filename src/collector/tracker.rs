//! Incremental transcript reading
//!
//! Remembers how far each transcript file has been read and turns newly
//! appended lines into host events.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::metrics::PricingTable;
use crate::session::SessionRegistry;
use crate::types::{AgentId, HostEvent, Result, TokenUsage, UsagePayload};

use super::parser::parse_line;

/// Length of a task detected from the first user message
pub const DETECTED_TASK_CHARS: usize = 80;

#[derive(Debug, Default)]
struct TrackedFile {
    offset: u64,
    messages_seen: u64,
    last_model: Option<String>,
}

/// Encode a working directory the way transcript folders are named
///
/// `/home/dev/my.app` becomes `-home-dev-my-app`.
pub fn encode_project_dir(path: &Path) -> String {
    path.to_string_lossy().replace(['/', '.'], "-")
}

fn saturating_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Turns appended transcript lines into `detected` and delta `usage` events
#[derive(Debug)]
pub struct TranscriptTracker {
    registry: Arc<SessionRegistry>,
    pricing: Arc<PricingTable>,
    files: HashMap<PathBuf, TrackedFile>,
}

impl TranscriptTracker {
    pub fn new(registry: Arc<SessionRegistry>, pricing: Arc<PricingTable>) -> Self {
        Self {
            registry,
            pricing,
            files: HashMap::new(),
        }
    }

    /// Number of transcript files seen so far
    pub fn tracked_files(&self) -> usize {
        self.files.len()
    }

    /// Session owning the transcript at `path`
    ///
    /// Matches the transcript folder name against the encoded working
    /// directory of each session. With exactly one session every transcript
    /// belongs to it.
    pub fn resolve_agent(&self, path: &Path) -> Option<AgentId> {
        let folder = path.parent()?.file_name()?.to_str()?;
        let sessions = self.registry.list_ordered();
        let matched = sessions
            .iter()
            .filter(|s| !s.working_dir.as_os_str().is_empty())
            .find(|s| encode_project_dir(&s.working_dir) == folder)
            .map(|s| s.id.clone());
        match (matched, sessions.as_slice()) {
            (Some(id), _) => Some(id),
            (None, [only]) => Some(only.id.clone()),
            (None, _) => None,
        }
    }

    /// Read what was appended to `path` since the last call
    ///
    /// A trailing line without a newline is left for the next call.
    pub fn process_file(&mut self, path: &Path) -> Result<Vec<HostEvent>> {
        let Some(agent_id) = self.resolve_agent(path) else {
            tracing::trace!(path = %path.display(), "Transcript without a matching session");
            return Ok(Vec::new());
        };

        let tracked = self.files.entry(path.to_path_buf()).or_default();
        let mut reader = BufReader::new(File::open(path)?);
        let len = reader.get_ref().metadata()?.len();
        if len < tracked.offset {
            // Truncated or replaced file
            tracing::debug!(path = %path.display(), "Transcript shrank, rereading");
            tracked.offset = 0;
        }
        reader.seek(SeekFrom::Start(tracked.offset))?;

        let mut events = Vec::new();
        let mut tokens = TokenUsage::new();
        let mut cost = 0.0;
        let mut messages = 0u64;
        let mut tool_calls = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 || !line.ends_with('\n') {
                break;
            }
            tracked.offset += read as u64;

            let Some(parsed) = parse_line(&line) else {
                continue;
            };
            if let Some(model) = &parsed.model {
                tracked.last_model = Some(model.clone());
            }
            if let Some(usage) = &parsed.usage {
                tokens.add(usage);
                if let Some(model) = &tracked.last_model {
                    cost += self.pricing.cost(usage, model);
                }
            }
            tool_calls.extend(parsed.tool_calls.iter().cloned());
            messages += 1;
            tracked.messages_seen += 1;

            if parsed.is_user() && tracked.messages_seen == 1 {
                if let Some(text) = &parsed.text {
                    events.push(HostEvent::Detected {
                        agent_id: agent_id.clone(),
                        task: text.chars().take(DETECTED_TASK_CHARS).collect(),
                    });
                }
            }
        }

        if messages > 0 {
            events.push(HostEvent::Usage {
                agent_id: agent_id.clone(),
                usage: UsagePayload {
                    model: tracked.last_model.clone(),
                    input_tokens: saturating_i64(tokens.input_tokens),
                    output_tokens: saturating_i64(tokens.output_tokens),
                    cache_read_input_tokens: saturating_i64(tokens.cache_read_input_tokens),
                    cache_creation_input_tokens: saturating_i64(
                        tokens.cache_creation_input_tokens,
                    ),
                    total_tokens: None,
                    cost: Some(cost),
                    message_delta: saturating_i64(messages),
                    tool_calls,
                },
            });
            tracing::debug!(
                agent_id = %agent_id,
                path = %path.display(),
                messages,
                tokens = tokens.total(),
                "Transcript batch read"
            );
        }
        Ok(events)
    }

    /// Start tracking `path` at its current end without reporting its content
    ///
    /// Used for transcripts that already existed before the dashboard started.
    pub fn skip_existing(&mut self, path: &Path) -> Result<()> {
        let len = std::fs::metadata(path)?.len();
        let tracked = self.files.entry(path.to_path_buf()).or_default();
        tracked.offset = len;
        if len > 0 {
            tracked.messages_seen = tracked.messages_seen.max(1);
        }
        Ok(())
    }

    /// Forget a file, e.g. after it was deleted
    pub fn forget(&mut self, path: &Path) {
        self.files.remove(path);
    }
}
