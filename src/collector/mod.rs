//! Transcript collector
//!
//! Reads agent transcript files as they grow and turns them into
//! `detected` and `usage` host events.

mod parser;
mod tracker;
mod watcher;

pub use parser::{TranscriptLine, parse_line};
pub use tracker::{DETECTED_TASK_CHARS, TranscriptTracker, encode_project_dir};
pub use watcher::{DEFAULT_DEBOUNCE_MS, TranscriptWatcher, WatcherHandle};
