//! Process host boundary
//!
//! The host owns the actual processes. The core talks to it through
//! [`ProcessHost`] and hears back through a stream of
//! [`HostEvent`](crate::types::HostEvent)s.

mod facade;
mod pty;
#[cfg(test)]
pub(crate) mod testing;
mod workdir;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::types::{AgentId, Result};

pub use facade::CommandFacade;
pub use pty::PtyHost;
pub use workdir::resolve_working_dir;

/// What to launch for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnKind {
    /// The agent command, with `task` as its prompt when non-empty
    Agent { task: String },
    /// The user's login shell
    Shell,
}

/// Parameters of one spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub agent_id: AgentId,
    pub kind: SpawnKind,
    pub working_dir: PathBuf,
    pub rows: u16,
    pub cols: u16,
}

impl SpawnRequest {
    pub fn agent(
        agent_id: AgentId,
        task: impl Into<String>,
        working_dir: PathBuf,
        rows: u16,
        cols: u16,
    ) -> Self {
        Self {
            agent_id,
            kind: SpawnKind::Agent { task: task.into() },
            working_dir,
            rows,
            cols,
        }
    }

    pub fn shell(agent_id: AgentId, working_dir: PathBuf, rows: u16, cols: u16) -> Self {
        Self {
            agent_id,
            kind: SpawnKind::Shell,
            working_dir,
            rows,
            cols,
        }
    }
}

/// Outbound commands to the process host
///
/// Every call may fail. The core never retries.
#[async_trait]
pub trait ProcessHost: Send + Sync + std::fmt::Debug {
    /// Launch a process for a session
    async fn spawn(&self, request: SpawnRequest) -> Result<()>;

    /// Send input bytes to the process
    async fn write(&self, id: &AgentId, data: &[u8]) -> Result<()>;

    /// Resize the terminal of the process
    async fn resize(&self, id: &AgentId, rows: u16, cols: u16) -> Result<()>;

    /// Terminate the process
    async fn kill(&self, id: &AgentId) -> Result<()>;

    /// Home directory of the host user, if known
    async fn home_dir(&self) -> Option<PathBuf>;
}
