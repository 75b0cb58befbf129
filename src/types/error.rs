//! Error types for the session core

use std::path::PathBuf;

use thiserror::Error;

use super::{AgentId, SessionStatus};

/// Coarse classification of errors
///
/// Mirrors the failure taxonomy of the core: command failures are recovered
/// locally, unknown sessions are dropped, malformed payloads are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A command to the process host failed
    Command,
    /// The addressed session does not exist
    UnknownSession,
    /// An inbound payload failed validation
    MalformedPayload,
    /// Configuration could not be loaded
    Configuration,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Stable name used in structured logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::UnknownSession => "unknown_session",
            Self::MalformedPayload => "malformed_payload",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

/// Main error type for the session core
#[derive(Debug, Error)]
pub enum SonarError {
    // === Session errors ===
    /// Session not found in the registry
    #[error("Session not found: {0}")]
    SessionNotFound(AgentId),

    /// Status change not allowed by the session state machine
    #[error("Invalid transition for {id}: cannot {action} from {from}")]
    InvalidTransition {
        id: AgentId,
        from: SessionStatus,
        action: &'static str,
    },

    // === Process host errors ===
    /// Spawning a process failed
    #[error("Failed to spawn {id}: {reason}")]
    SpawnFailed { id: AgentId, reason: String },

    /// The host has no process for this session
    #[error("No process for session: {0}")]
    ProcessNotFound(AgentId),

    /// A write, resize or kill was rejected by the host
    #[error("{command} failed for {id}: {reason}")]
    CommandFailed {
        command: &'static str,
        id: AgentId,
        reason: String,
    },

    /// Working directory does not exist or is not a directory
    #[error("Invalid working directory: {0:?}")]
    InvalidWorkingDir(PathBuf),

    /// Pseudo-terminal error
    #[error("PTY error: {0}")]
    Pty(String),

    // === Payload errors ===
    /// Usage payload failed validation
    #[error("Malformed usage payload: {0}")]
    MalformedUsage(String),

    // === Configuration errors ===
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transcript watcher could not be started
    #[error("Watcher error: {0}")]
    Watcher(String),

    // === External errors ===
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the session core
pub type Result<T> = std::result::Result<T, SonarError>;

impl SonarError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SonarError::SessionNotFound(_) => ErrorKind::UnknownSession,
            SonarError::InvalidTransition { .. } => ErrorKind::Internal,
            SonarError::SpawnFailed { .. } => ErrorKind::Command,
            SonarError::ProcessNotFound(_) => ErrorKind::Command,
            SonarError::CommandFailed { .. } => ErrorKind::Command,
            SonarError::InvalidWorkingDir(_) => ErrorKind::Command,
            SonarError::Pty(_) => ErrorKind::Command,
            SonarError::MalformedUsage(_) => ErrorKind::MalformedPayload,
            SonarError::ConfigError(_) => ErrorKind::Configuration,
            SonarError::Watcher(_) => ErrorKind::Configuration,
            SonarError::Io(_) => ErrorKind::Internal,
            SonarError::Json(_) => ErrorKind::MalformedPayload,
        }
    }

    /// Check if re-issuing the same command could succeed
    ///
    /// The core never retries on its own; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SonarError::CommandFailed { .. } | SonarError::Pty(_))
    }

    /// Check if this error was caused by invalid input
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SonarError::SessionNotFound(_)
                | SonarError::InvalidTransition { .. }
                | SonarError::InvalidWorkingDir(_)
                | SonarError::MalformedUsage(_)
        )
    }

    // === Constructor helpers ===

    /// Create a session not found error
    pub fn session_not_found(id: impl Into<AgentId>) -> Self {
        SonarError::SessionNotFound(id.into())
    }

    /// Create a spawn failure
    pub fn spawn_failed(id: impl Into<AgentId>, reason: impl Into<String>) -> Self {
        SonarError::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure
    pub fn command_failed(
        command: &'static str,
        id: impl Into<AgentId>,
        reason: impl Into<String>,
    ) -> Self {
        SonarError::CommandFailed {
            command,
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed usage error
    pub fn malformed_usage(msg: impl Into<String>) -> Self {
        SonarError::MalformedUsage(msg.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        SonarError::ConfigError(msg.into())
    }

    /// Create a PTY error
    pub fn pty(msg: impl Into<String>) -> Self {
        SonarError::Pty(msg.into())
    }
}
