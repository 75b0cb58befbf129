//! Core configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default command launched for agent sessions
pub const DEFAULT_AGENT_COMMAND: &str = "claude";
/// Last-resort working directory when the host reports no home
pub const DEFAULT_FALLBACK_DIR: &str = "/tmp";
pub const DEFAULT_PTY_ROWS: u16 = 40;
pub const DEFAULT_PTY_COLS: u16 = 120;
pub const DEFAULT_TICK_MS: u64 = 1_000;

/// Configuration of the session core
#[derive(Debug, Clone, PartialEq)]
pub struct SonarConfig {
    /// Executable launched for agent sessions
    /// Environment variable: `SONAR_AGENT_COMMAND`
    pub agent_command: String,

    /// Working directory used when home resolution fails
    /// Environment variable: `SONAR_FALLBACK_DIR`
    pub fallback_dir: PathBuf,

    /// Initial pseudo-terminal rows
    /// Environment variable: `SONAR_PTY_ROWS`
    pub pty_rows: u16,

    /// Initial pseudo-terminal columns
    /// Environment variable: `SONAR_PTY_COLS`
    pub pty_cols: u16,

    /// Period of the duration ticker
    /// Environment variable: `SONAR_TICK_MS`
    pub tick_interval: Duration,

    /// Directory holding agent transcripts; auto-detected when unset
    /// Environment variable: `SONAR_PROJECTS_DIR`
    pub projects_dir: Option<PathBuf>,

    /// JSON file replacing the built-in pricing table
    /// Environment variable: `SONAR_PRICING_FILE`
    pub pricing_file: Option<PathBuf>,

    /// Feed terminal output to the loop detector
    /// Environment variable: `SONAR_LOOP_DETECTION`
    pub loop_detection: bool,
}

impl Default for SonarConfig {
    fn default() -> Self {
        Self {
            agent_command: DEFAULT_AGENT_COMMAND.to_string(),
            fallback_dir: PathBuf::from(DEFAULT_FALLBACK_DIR),
            pty_rows: DEFAULT_PTY_ROWS,
            pty_cols: DEFAULT_PTY_COLS,
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
            projects_dir: None,
            pricing_file: None,
            loop_detection: true,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable boolean variable");
            None
        }
    }
}

impl SonarConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let tick_interval = env_parse::<u64>("SONAR_TICK_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.tick_interval);

        Self {
            agent_command: env_nonempty("SONAR_AGENT_COMMAND").unwrap_or(defaults.agent_command),
            fallback_dir: env_nonempty("SONAR_FALLBACK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_dir),
            pty_rows: env_parse("SONAR_PTY_ROWS")
                .filter(|rows| *rows > 0)
                .unwrap_or(defaults.pty_rows),
            pty_cols: env_parse("SONAR_PTY_COLS")
                .filter(|cols| *cols > 0)
                .unwrap_or(defaults.pty_cols),
            tick_interval,
            projects_dir: env_nonempty("SONAR_PROJECTS_DIR").map(PathBuf::from),
            pricing_file: env_nonempty("SONAR_PRICING_FILE").map(PathBuf::from),
            loop_detection: env_flag("SONAR_LOOP_DETECTION").unwrap_or(defaults.loop_detection),
        }
    }

    /// Transcript directory: configured, or the first existing default
    ///
    /// Defaults are `~/.config/claude/projects` then `~/.claude/projects`.
    pub fn resolve_projects_dir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.projects_dir {
            return Some(dir.clone());
        }
        let home = dirs::home_dir()?;
        [
            home.join(".config").join("claude").join("projects"),
            home.join(".claude").join("projects"),
        ]
        .into_iter()
        .find(|p| p.is_dir())
    }
}
