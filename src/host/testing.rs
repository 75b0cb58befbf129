//! Recording process host for tests

use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{ProcessHost, SpawnRequest};
use crate::types::{AgentId, Result, SonarError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HostCall {
    Spawn(SpawnRequest),
    Write(AgentId, Vec<u8>),
    Resize(AgentId, u16, u16),
    Kill(AgentId),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    pub calls: Mutex<Vec<HostCall>>,
    pub home: Option<PathBuf>,
    pub fail_spawn: AtomicBool,
    pub fail_commands: AtomicBool,
}

impl RecordingHost {
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: Some(home.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, command: &'static str, id: &AgentId) -> Result<()> {
        if self.fail_commands.load(Ordering::SeqCst) {
            Err(SonarError::command_failed(command, id, "host refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProcessHost for RecordingHost {
    async fn spawn(&self, request: SpawnRequest) -> Result<()> {
        let id = request.agent_id.clone();
        self.record(HostCall::Spawn(request));
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(SonarError::spawn_failed(id, "no such directory"));
        }
        Ok(())
    }

    async fn write(&self, id: &AgentId, data: &[u8]) -> Result<()> {
        self.record(HostCall::Write(id.clone(), data.to_vec()));
        self.check("write", id)
    }

    async fn resize(&self, id: &AgentId, rows: u16, cols: u16) -> Result<()> {
        self.record(HostCall::Resize(id.clone(), rows, cols));
        self.check("resize", id)
    }

    async fn kill(&self, id: &AgentId) -> Result<()> {
        self.record(HostCall::Kill(id.clone()));
        self.check("kill", id)
    }

    async fn home_dir(&self) -> Option<PathBuf> {
        self.home.clone()
    }
}
