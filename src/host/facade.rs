//! Commands from the presentation layer to the process host
//!
//! The facade owns no state. It forwards commands to the host and folds
//! their failures back into the registry.

use std::path::PathBuf;
use std::sync::Arc;

use crate::session::SessionRegistry;
use crate::telemetry::ErrorTraceExt;
use crate::types::{
    AgentId, AgentSession, Result, SessionPatch, SessionStatus, SonarConfig, SonarError, now_millis,
};

use super::{ProcessHost, SpawnRequest, resolve_working_dir};

#[derive(Debug, Clone)]
pub struct CommandFacade {
    host: Arc<dyn ProcessHost>,
    registry: Arc<SessionRegistry>,
    fallback_dir: PathBuf,
    rows: u16,
    cols: u16,
}

impl CommandFacade {
    pub fn new(
        host: Arc<dyn ProcessHost>,
        registry: Arc<SessionRegistry>,
        config: &SonarConfig,
    ) -> Self {
        Self {
            host,
            registry,
            fallback_dir: config.fallback_dir.clone(),
            rows: config.pty_rows,
            cols: config.pty_cols,
        }
    }

    /// Resolve a user-supplied directory against the host's home
    pub async fn resolve_dir(&self, raw: &str) -> PathBuf {
        let home = self.host.home_dir().await;
        if home.is_none() && matches!(raw, "" | "~") {
            tracing::debug!(fallback = %self.fallback_dir.display(), "Host reports no home directory");
        }
        resolve_working_dir(raw, home.as_deref(), &self.fallback_dir)
    }

    /// Start `task` in a fresh run of session `id`
    ///
    /// The session enters `running` before the spawn is attempted; a spawn
    /// failure moves it to `error` and is returned. There is no retry.
    pub async fn start(&self, id: &AgentId, task: &str, working_dir: &str) -> Result<AgentSession> {
        let dir = self.resolve_dir(working_dir).await;
        let session = self.registry.start(id, task, dir.clone(), now_millis())?;

        let request = SpawnRequest::agent(id.clone(), task, dir, self.rows, self.cols);
        if let Err(e) = self.host.spawn(request).await {
            e.trace_error("spawn agent");
            if let Err(transition) = self.registry.fail(id, now_millis()) {
                tracing::debug!(agent_id = %id, error = %transition, "Session gone before spawn failed");
            }
            return Err(e);
        }
        Ok(session)
    }

    /// Open a login shell for session `id` without starting a task
    ///
    /// The session stays `idle`; a spawn failure marks it `error`.
    pub async fn spawn_shell(
        &self,
        id: &AgentId,
        working_dir: &str,
        rows: u16,
        cols: u16,
    ) -> Result<()> {
        let dir = self.resolve_dir(working_dir).await;
        let known = self.registry.update(
            id,
            SessionPatch {
                working_dir: Some(dir.clone()),
                ..Default::default()
            },
        );
        if !known {
            return Err(SonarError::session_not_found(id));
        }

        let request = SpawnRequest::shell(id.clone(), dir, rows, cols);
        if let Err(e) = self.host.spawn(request).await {
            e.trace_error("spawn shell");
            self.registry.update(
                id,
                SessionPatch {
                    status: Some(SessionStatus::Error),
                    ..Default::default()
                },
            );
            return Err(e);
        }
        Ok(())
    }

    /// Send input to the process; failures leave the status alone
    pub async fn write(&self, id: &AgentId, data: &[u8]) -> Result<()> {
        self.host.write(id, data).await.inspect_err(|e| {
            tracing::warn!(agent_id = %id, error = %e, "Write failed");
        })
    }

    /// Resize the terminal; failures leave the status alone
    pub async fn resize(&self, id: &AgentId, rows: u16, cols: u16) -> Result<()> {
        self.host.resize(id, rows, cols).await.inspect_err(|e| {
            tracing::warn!(agent_id = %id, rows, cols, error = %e, "Resize failed");
        })
    }

    /// Terminate the process and complete the run
    ///
    /// The session is marked `completed` even when the host reports a
    /// failure; that failure is still returned.
    pub async fn kill(&self, id: &AgentId) -> Result<()> {
        let result = self.host.kill(id).await;
        if let Err(e) = &result {
            tracing::warn!(agent_id = %id, error = %e, "Kill failed");
        }
        match self.registry.stop(id, now_millis()) {
            Ok(session) => {
                tracing::info!(agent_id = %id, duration_ms = session.duration, "Session stopped");
            }
            Err(e) => tracing::debug!(agent_id = %id, error = %e, "Kill on inactive session"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{HostCall, RecordingHost};
    use crate::host::SpawnKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::Ordering;

    fn setup(host: RecordingHost) -> (Arc<RecordingHost>, Arc<SessionRegistry>, CommandFacade) {
        let host = Arc::new(host);
        let registry = Arc::new(SessionRegistry::new());
        let facade = CommandFacade::new(host.clone(), registry.clone(), &SonarConfig::default());
        (host, registry, facade)
    }

    #[tokio::test]
    async fn test_start_spawns_in_resolved_dir() {
        let (host, registry, facade) = setup(RecordingHost::with_home("/home/dev"));
        let id = registry.create();

        let session = facade.start(&id, "build project", "~").await.unwrap();
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.working_dir, PathBuf::from("/home/dev"));
        assert_eq!(session.task, "build project");

        assert_eq!(
            host.calls(),
            vec![HostCall::Spawn(SpawnRequest {
                agent_id: id.clone(),
                kind: SpawnKind::Agent {
                    task: "build project".into()
                },
                working_dir: PathBuf::from("/home/dev"),
                rows: 40,
                cols: 120,
            })]
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_error() {
        let host = RecordingHost::default();
        host.fail_spawn.store(true, Ordering::SeqCst);
        let (_host, registry, facade) = setup(host);
        let id = registry.create();

        let err = facade.start(&id, "t", "").await.unwrap_err();
        assert!(matches!(err, SonarError::SpawnFailed { .. }));
        let session = registry.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        // No home: the fallback directory is used
        assert_eq!(session.working_dir, PathBuf::from("/tmp"));
    }

    #[tokio::test]
    async fn test_start_unknown_session() {
        let (host, _registry, facade) = setup(RecordingHost::default());
        let err = facade
            .start(&AgentId::from("agent-7"), "t", "/srv")
            .await
            .unwrap_err();
        assert!(matches!(err, SonarError::SessionNotFound(_)));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_write_and_resize_failures_keep_status() {
        let host = RecordingHost::default();
        host.fail_commands.store(true, Ordering::SeqCst);
        let (_host, registry, facade) = setup(host);
        let id = registry.create();
        facade.start(&id, "t", "/srv").await.unwrap();

        assert!(facade.write(&id, b"ls\n").await.is_err());
        assert!(facade.resize(&id, 50, 200).await.is_err());
        assert_eq!(registry.status(&id), Some(SessionStatus::Running));
    }

    #[tokio::test]
    async fn test_kill_completes_even_when_host_fails() {
        let host = RecordingHost::default();
        host.fail_commands.store(true, Ordering::SeqCst);
        let (_host, registry, facade) = setup(host);
        let id = registry.create();
        facade.start(&id, "t", "/srv").await.unwrap();

        assert!(facade.kill(&id).await.is_err());
        assert_eq!(registry.status(&id), Some(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_shell_keeps_idle_status() {
        let (host, registry, facade) = setup(RecordingHost::with_home("/home/dev"));
        let id = registry.create();

        facade.spawn_shell(&id, "~/code", 24, 80).await.unwrap();
        let session = registry.get(&id).unwrap();
        assert_eq!(session.status, SessionStatus::Idle);
        assert_eq!(session.working_dir, PathBuf::from("/home/dev/code"));
        assert!(matches!(
            host.calls().as_slice(),
            [HostCall::Spawn(SpawnRequest {
                kind: SpawnKind::Shell,
                rows: 24,
                cols: 80,
                ..
            })]
        ));

        // Killing an idle shell is not a run to complete
        facade.kill(&id).await.unwrap();
        assert_eq!(registry.status(&id), Some(SessionStatus::Idle));
    }

    #[tokio::test]
    async fn test_shell_spawn_failure_marks_error() {
        let host = RecordingHost::default();
        host.fail_spawn.store(true, Ordering::SeqCst);
        let (_host, registry, facade) = setup(host);
        let id = registry.create();

        assert!(facade.spawn_shell(&id, "", 24, 80).await.is_err());
        assert_eq!(registry.status(&id), Some(SessionStatus::Error));
    }
}
