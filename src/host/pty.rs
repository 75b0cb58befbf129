//! Native pseudo-terminal process host
//!
//! Each session gets its own pty pair. A blocking reader thread per process
//! forwards output chunks and reports the exit once the pty closes.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;

use super::{ProcessHost, SpawnKind, SpawnRequest};
use crate::types::{AgentId, DEFAULT_AGENT_COMMAND, HostEvent, Result, SonarError};

const READ_BUFFER_SIZE: usize = 4096;

struct PtyProcess {
    generation: u64,
    writer: Box<dyn Write + Send>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    killed: Arc<AtomicBool>,
}

struct Inner {
    agent_command: String,
    processes: Mutex<HashMap<AgentId, PtyProcess>>,
    generation: AtomicU64,
    events: mpsc::UnboundedSender<HostEvent>,
}

impl Inner {
    fn processes(&self) -> MutexGuard<'_, HashMap<AgentId, PtyProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`ProcessHost`] backed by `portable-pty`
#[derive(Clone)]
pub struct PtyHost {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PtyHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHost")
            .field("agent_command", &self.inner.agent_command)
            .field("processes", &self.inner.processes().len())
            .finish()
    }
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtyHost {
    /// Create a host publishing events on `events`
    pub fn new(agent_command: impl Into<String>, events: mpsc::UnboundedSender<HostEvent>) -> Self {
        let agent_command = agent_command.into();
        let agent_command = if agent_command.trim().is_empty() {
            DEFAULT_AGENT_COMMAND.to_string()
        } else {
            agent_command
        };
        Self {
            inner: Arc::new(Inner {
                agent_command,
                processes: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    /// Number of live processes
    pub fn process_count(&self) -> usize {
        self.inner.processes().len()
    }

    /// Check if a process is tracked for `id`
    pub fn is_alive(&self, id: &AgentId) -> bool {
        self.inner.processes().contains_key(id)
    }

    fn command_for(&self, request: &SpawnRequest) -> CommandBuilder {
        let mut cmd = match &request.kind {
            SpawnKind::Shell => CommandBuilder::new_default_prog(),
            SpawnKind::Agent { task } => {
                let mut cmd = CommandBuilder::new(&self.inner.agent_command);
                if !task.is_empty() {
                    cmd.arg("-p");
                    cmd.arg(task);
                }
                cmd
            }
        };
        cmd.cwd(&request.working_dir);
        cmd
    }

    fn spawn_sync(&self, request: SpawnRequest) -> Result<()> {
        let id = request.agent_id.clone();
        if !request.working_dir.is_dir() {
            return Err(SonarError::InvalidWorkingDir(request.working_dir));
        }

        let pair = native_pty_system()
            .openpty(pty_size(request.rows, request.cols))
            .map_err(|e| SonarError::pty(format!("failed to open pty: {e}")))?;

        let cmd = self.command_for(&request);
        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SonarError::spawn_failed(&id, e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SonarError::pty(format!("failed to clone reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SonarError::pty(format!("failed to take writer: {e}")))?;
        let killer = child.clone_killer();

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let killed = Arc::new(AtomicBool::new(false));
        let previous = self.inner.processes().insert(
            id.clone(),
            PtyProcess {
                generation,
                writer,
                master: pair.master,
                killer,
                killed: Arc::clone(&killed),
            },
        );
        if let Some(mut previous) = previous {
            tracing::warn!(agent_id = %id, "Replacing live process");
            previous.killed.store(true, Ordering::SeqCst);
            drop(previous.killer.kill());
        }

        let inner = Arc::clone(&self.inner);
        let thread_id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("pty-{id}"))
            .spawn(move || {
                pump_output(&inner, &thread_id, reader);
                if killed.load(Ordering::SeqCst) {
                    drop(child.kill());
                    drop(child.wait());
                    finish_killed(&inner, &thread_id, generation);
                    return;
                }
                let code = child
                    .wait()
                    .ok()
                    .and_then(|status| i32::try_from(status.exit_code()).ok());
                finish(&inner, &thread_id, generation, code);
            });
        if let Err(e) = spawned {
            if let Some(mut process) = self.inner.processes().remove(&id) {
                drop(process.killer.kill());
            }
            return Err(SonarError::spawn_failed(&id, format!("reader thread: {e}")));
        }

        tracing::info!(
            agent_id = %id,
            kind = ?request.kind,
            working_dir = %request.working_dir.display(),
            "Process spawned"
        );
        Ok(())
    }
}

fn pump_output(inner: &Inner, id: &AgentId, mut reader: Box<dyn Read + Send>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let event = HostEvent::Output {
                    agent_id: id.clone(),
                    data: buf[..n].to_vec(),
                };
                if inner.events.send(event).is_err() {
                    // Nobody consumes events any more
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                tracing::debug!(agent_id = %id, error = %e, "PTY read ended");
                break;
            }
        }
    }
}

/// A killed process reports no exit; whoever killed it already settled the run
fn finish_killed(inner: &Inner, id: &AgentId, generation: u64) {
    let mut processes = inner.processes();
    if processes.get(id).is_some_and(|p| p.generation == generation) {
        processes.remove(id);
    }
    tracing::debug!(agent_id = %id, generation, "Exit of killed process suppressed");
}

fn finish(inner: &Inner, id: &AgentId, generation: u64, code: Option<i32>) {
    let superseded = {
        let mut processes = inner.processes();
        match processes.get(id).map(|p| p.generation) {
            Some(current) if current == generation => {
                processes.remove(id);
                false
            }
            Some(_) => true,
            None => false,
        }
    };
    // A newer process owns this id; its own exit will be reported
    if superseded {
        tracing::debug!(agent_id = %id, generation, "Exit of replaced process suppressed");
        return;
    }
    tracing::debug!(agent_id = %id, code = ?code, "Process exited");
    drop(inner.events.send(HostEvent::Exit {
        agent_id: id.clone(),
        code,
    }));
}

fn join_error(command: &'static str, id: &AgentId, e: tokio::task::JoinError) -> SonarError {
    SonarError::command_failed(command, id, format!("blocking task failed: {e}"))
}

#[async_trait]
impl ProcessHost for PtyHost {
    async fn spawn(&self, request: SpawnRequest) -> Result<()> {
        let host = self.clone();
        let id = request.agent_id.clone();
        tokio::task::spawn_blocking(move || host.spawn_sync(request))
            .await
            .map_err(|e| join_error("spawn", &id, e))?
    }

    async fn write(&self, id: &AgentId, data: &[u8]) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let owned_id = id.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut processes = inner.processes();
            let process = processes
                .get_mut(&owned_id)
                .ok_or_else(|| SonarError::ProcessNotFound(owned_id.clone()))?;
            process
                .writer
                .write_all(&data)
                .and_then(|()| process.writer.flush())
                .map_err(|e| SonarError::command_failed("write", &owned_id, e.to_string()))
        })
        .await
        .map_err(|e| join_error("write", id, e))?
    }

    async fn resize(&self, id: &AgentId, rows: u16, cols: u16) -> Result<()> {
        let processes = self.inner.processes();
        let process = processes
            .get(id)
            .ok_or_else(|| SonarError::ProcessNotFound(id.clone()))?;
        process
            .master
            .resize(pty_size(rows, cols))
            .map_err(|e| SonarError::command_failed("resize", id, e.to_string()))
    }

    async fn kill(&self, id: &AgentId) -> Result<()> {
        let mut process = {
            let mut processes = self.inner.processes();
            let process = processes
                .get(id)
                .ok_or_else(|| SonarError::ProcessNotFound(id.clone()))?;
            // Flag before the entry goes away so the reader never sees a bare exit
            process.killed.store(true, Ordering::SeqCst);
            processes
                .remove(id)
                .ok_or_else(|| SonarError::ProcessNotFound(id.clone()))?
        };
        process
            .killer
            .kill()
            .map_err(|e| SonarError::command_failed("kill", id, e.to_string()))?;
        tracing::info!(agent_id = %id, "Process killed");
        Ok(())
    }

    async fn home_dir(&self) -> Option<PathBuf> {
        dirs::home_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host() -> (PtyHost, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PtyHost::new("", tx), rx)
    }

    #[test]
    fn test_blank_command_uses_default() {
        let (host, _rx) = host();
        assert_eq!(host.inner.agent_command, "claude");
    }

    #[test]
    fn test_agent_command_line() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let host = PtyHost::new("codex", tx);
        let request = SpawnRequest::agent(
            AgentId::from("agent-1"),
            "fix tests",
            PathBuf::from("/tmp"),
            40,
            120,
        );
        let cmd = host.command_for(&request);
        let argv: Vec<String> = cmd
            .get_argv()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(argv, vec!["codex", "-p", "fix tests"]);

        let interactive = SpawnRequest::agent(AgentId::from("agent-2"), "", PathBuf::from("/tmp"), 40, 120);
        assert_eq!(host.command_for(&interactive).get_argv().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_process_commands_fail() {
        let (host, _rx) = host();
        let id = AgentId::from("agent-9");
        assert!(matches!(
            host.write(&id, b"x").await,
            Err(SonarError::ProcessNotFound(_))
        ));
        assert!(matches!(
            host.resize(&id, 10, 10).await,
            Err(SonarError::ProcessNotFound(_))
        ));
        assert!(matches!(
            host.kill(&id).await,
            Err(SonarError::ProcessNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_rejects_missing_directory() {
        let (host, _rx) = host();
        let request = SpawnRequest::shell(
            AgentId::from("agent-1"),
            PathBuf::from("/definitely/not/here"),
            24,
            80,
        );
        let err = host.spawn(request).await.unwrap_err();
        assert!(matches!(err, SonarError::InvalidWorkingDir(_)));
        assert_eq!(host.process_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_streams_output_and_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = PtyHost::new("echo", tx);
        let id = AgentId::from("agent-1");
        let dir = tempfile::tempdir().unwrap();
        let request = SpawnRequest::agent(id.clone(), "hello-pty", dir.path().to_path_buf(), 24, 80);
        host.spawn(request).await.unwrap();

        let mut output = Vec::new();
        let code = tokio::time::timeout(std::time::Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Some(HostEvent::Output { data, .. }) => output.extend(data),
                    Some(HostEvent::Exit { code, .. }) => return code,
                    Some(_) => {}
                    None => return None,
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(code, Some(0));
        assert!(String::from_utf8_lossy(&output).contains("hello-pty"));
        assert!(!host.is_alive(&id));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_killed_process_reports_no_exit() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = PtyHost::new("cat", tx);
        let id = AgentId::from("agent-1");
        let dir = tempfile::tempdir().unwrap();
        let request = || SpawnRequest::agent(id.clone(), "", dir.path().to_path_buf(), 24, 80);

        host.spawn(request()).await.unwrap();
        host.kill(&id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        host.spawn(request()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, HostEvent::Exit { .. }),
                "unexpected exit: {event:?}"
            );
        }
        assert!(host.is_alive(&id));
        host.kill(&id).await.unwrap();
    }
}
