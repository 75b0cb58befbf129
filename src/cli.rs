//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the agent-sonar binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::types::SonarConfig;

/// agent-sonar - run coding agents side by side and track what they cost
#[derive(Parser, Debug, Clone)]
#[command(name = "agent-sonar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Tasks to run, one agent each; without tasks a shell is opened
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,

    /// Working directory for every session (`~`, `~/x` and relative paths start at home)
    #[arg(short = 'C', long, value_name = "DIR", default_value = "")]
    pub cwd: String,

    /// Open a plain shell even when tasks are given
    #[arg(long)]
    pub shell: bool,

    /// Agent executable (overrides SONAR_AGENT_COMMAND)
    #[arg(long, value_name = "CMD")]
    pub agent_command: Option<String>,

    /// Tail agent transcripts for usage and task detection
    #[arg(short, long)]
    pub watch_transcripts: bool,

    /// Duration ticker period in milliseconds (overrides SONAR_TICK_MS)
    #[arg(long, value_name = "MS")]
    pub tick_ms: Option<u64>,

    /// Pricing table JSON (overrides SONAR_PRICING_FILE)
    #[arg(long, value_name = "FILE")]
    pub pricing_file: Option<PathBuf>,

    /// Disable loop detection on terminal output
    #[arg(long)]
    pub no_loop_detection: bool,

    /// Write session records as JSON lines to this file on exit
    #[arg(short, long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Emit logs as JSON on stderr
    #[arg(long)]
    pub json_logs: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,

    /// OpenTelemetry OTLP endpoint (e.g., http://localhost:4317)
    /// Accepted but ignored when built without the otel feature.
    #[arg(long, value_name = "URL", env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    /// OpenTelemetry service name
    #[arg(long, value_name = "NAME", default_value = "agent-sonar")]
    pub otel_service_name: String,
}

#[allow(clippy::derivable_impls)]
impl Default for Cli {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            cwd: String::new(),
            shell: false,
            agent_command: None,
            watch_transcripts: false,
            tick_ms: None,
            pricing_file: None,
            no_loop_detection: false,
            export: None,
            diagnostic: false,
            log_dir: None,
            log_file: None,
            json_logs: false,
            verbose: 0,
            quiet: false,
            otel_endpoint: None,
            otel_service_name: "agent-sonar".to_string(),
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Check if OpenTelemetry tracing is enabled
    #[cfg(feature = "otel")]
    pub fn is_otel_enabled(&self) -> bool {
        self.otel_endpoint.is_some()
    }

    /// Always false without the otel feature
    #[cfg(not(feature = "otel"))]
    pub fn is_otel_enabled(&self) -> bool {
        if self.otel_endpoint.is_some() {
            tracing::warn!("--otel-endpoint specified but otel feature is not enabled, ignoring");
        }
        false
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Defaults to `agent-sonar-{timestamp}.log` in the system temp directory.
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("agent-sonar-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Whether to open a shell instead of agent sessions
    pub fn wants_shell(&self) -> bool {
        self.shell || self.tasks.is_empty()
    }

    /// Layer CLI overrides on top of `base`
    pub fn apply_to(&self, mut base: SonarConfig) -> SonarConfig {
        if let Some(command) = self.agent_command.as_ref().filter(|c| !c.trim().is_empty()) {
            base.agent_command = command.clone();
        }
        if let Some(ms) = self.tick_ms.filter(|ms| *ms > 0) {
            base.tick_interval = Duration::from_millis(ms);
        }
        if let Some(path) = &self.pricing_file {
            base.pricing_file = Some(path.clone());
        }
        if self.no_loop_detection {
            base.loop_detection = false;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cli() {
        let cli = Cli::default();
        assert!(!cli.is_diagnostic());
        assert_eq!(cli.log_level(), tracing::Level::INFO);
        assert!(cli.wants_shell());
    }

    #[test]
    fn test_parse_tasks_and_flags() {
        let cli = Cli::parse_from([
            "agent-sonar",
            "-C",
            "~/src/app",
            "--tick-ms",
            "500",
            "-w",
            "fix the build",
            "write docs",
        ]);
        assert_eq!(cli.tasks, vec!["fix the build", "write docs"]);
        assert_eq!(cli.cwd, "~/src/app");
        assert_eq!(cli.tick_ms, Some(500));
        assert!(cli.watch_transcripts);
        assert!(!cli.wants_shell());
    }

    #[test]
    fn test_log_dir_implies_diagnostic() {
        let cli = Cli {
            log_dir: Some(PathBuf::from("/tmp")),
            ..Default::default()
        };
        assert!(cli.is_diagnostic());

        let cli = Cli {
            log_file: Some("sonar.log".to_string()),
            ..Default::default()
        };
        assert!(cli.is_diagnostic());
    }

    #[test]
    fn test_log_levels() {
        let cli = Cli {
            quiet: true,
            verbose: 2,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::ERROR);

        let cli = Cli {
            verbose: 1,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);

        let cli = Cli {
            verbose: 3,
            ..Default::default()
        };
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_log_path() {
        let cli = Cli {
            log_dir: Some(PathBuf::from("/var/log")),
            log_file: Some("test.log".to_string()),
            ..Default::default()
        };
        assert_eq!(cli.log_path(), PathBuf::from("/var/log/test.log"));

        let path = Cli::default().log_path();
        assert!(path.starts_with(std::env::temp_dir()));
        let filename = path.file_name().unwrap().to_str().unwrap();
        assert!(filename.starts_with("agent-sonar-"));
    }

    #[test]
    fn test_apply_to_overrides_config() {
        let cli = Cli {
            agent_command: Some("codex".into()),
            tick_ms: Some(250),
            no_loop_detection: true,
            ..Default::default()
        };
        let config = cli.apply_to(SonarConfig::default());
        assert_eq!(config.agent_command, "codex");
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert!(!config.loop_detection);

        let untouched = Cli::default().apply_to(SonarConfig::default());
        assert_eq!(untouched, SonarConfig::default());
    }
}
