//! Binary entry point logic
//!
//! Builds the dashboard core on a native pseudo-terminal host, launches the
//! requested sessions and waits for them to finish.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;

use crate::cli::Cli;
use crate::collector::{DEFAULT_DEBOUNCE_MS, TranscriptTracker, TranscriptWatcher, WatcherHandle};
use crate::host::PtyHost;
use crate::metrics::{FleetTotals, PricingTable, session_line};
use crate::mux::ChannelSink;
use crate::session::SessionRegistry;
use crate::telemetry::{ErrorTraceExt, init_logging};
use crate::types::{AgentId, AgentSession, HostEvent, SessionRecord, SonarConfig};

use super::SonarCore;

/// How often the wait loop rechecks when no registry change arrives
const WAIT_POLL: Duration = Duration::from_millis(250);

/// Run the dashboard with CLI arguments
pub async fn run_with_cli(cli: &Cli) -> anyhow::Result<()> {
    let startup_time = Instant::now();

    // Logging must be up before anything traces
    init_logging(cli)?;

    {
        let startup_span = tracing::info_span!(
            "sonar_startup",
            version = %env!("CARGO_PKG_VERSION"),
            pid = %std::process::id(),
            diagnostic = %cli.is_diagnostic(),
            otel_enabled = %cli.is_otel_enabled(),
        );
        let _enter = startup_span.enter();

        tracing::info!("========== agent-sonar starting ==========");
        if cli.is_diagnostic() {
            tracing::info!(log_path = %cli.log_path().display(), "Diagnostic mode enabled");
        }
        if let Some(endpoint) = &cli.otel_endpoint {
            tracing::info!(otel_endpoint = %endpoint, "OpenTelemetry tracing enabled");
        }
        tracing::info!(
            init_elapsed_ms = startup_time.elapsed().as_millis(),
            "Logging initialized"
        );
    }

    let config = cli.apply_to(SonarConfig::from_env());
    let pricing = match &config.pricing_file {
        Some(path) => PricingTable::from_file(path)?,
        None => PricingTable::builtin(),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let host = Arc::new(PtyHost::new(config.agent_command.clone(), events_tx.clone()));
    let core = Arc::new(SonarCore::new(
        Arc::new(SessionRegistry::new()),
        host.clone(),
        pricing,
        config,
    ));
    let dispatch = core.subscribe(events_rx);
    let ticker = core.start_ticker();
    let watcher = if cli.watch_transcripts {
        start_transcript_watcher(&core, events_tx)
    } else {
        drop(events_tx);
        None
    };

    let ids = launch(&core, cli).await?;
    tracing::info!(
        sessions = ids.len(),
        startup_ms = startup_time.elapsed().as_millis(),
        "Sessions launched"
    );

    tokio::select! {
        () = wait_until_done(&core, &host) => tracing::info!("All sessions finished"),
        name = shutdown_signal() => {
            eprintln!("Received {name}, shutting down...");
            tracing::info!(signal = name, "Shutdown requested");
        }
    }

    eprint!("{}", summary_report(&core.registry().list_ordered()));
    if let Some(path) = &cli.export {
        write_export(path, &core.records())?;
        tracing::info!(path = %path.display(), "Session records exported");
    }

    ticker.stop().await;
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    let ids = core.registry().ids();
    join_all(ids.iter().map(|id| core.close_session(id))).await;
    core.shutdown();
    if let Some(dispatch) = dispatch {
        if let Err(e) = dispatch.await {
            tracing::warn!(error = ?e, "Event dispatch task failed");
        }
    }

    tracing::info!(
        uptime_ms = startup_time.elapsed().as_millis(),
        "========== agent-sonar shutdown complete =========="
    );
    Ok(())
}

/// Create the sessions the command line asks for
///
/// The first session's output is mirrored to stdout. Sessions whose spawn
/// fails stay in the registry with status `error`.
async fn launch(core: &Arc<SonarCore>, cli: &Cli) -> anyhow::Result<Vec<AgentId>> {
    if cli.wants_shell() {
        if !cli.tasks.is_empty() {
            tracing::warn!(tasks = cli.tasks.len(), "Shell mode, tasks ignored");
        }
        let id = core.new_session();
        mirror_to_stdout(core, &id)?;
        match core.open_shell(&id, &cli.cwd).await {
            Ok(()) => forward_stdin(core.clone(), id.clone()),
            Err(e) => eprintln!("{id}: {e}"),
        }
        return Ok(vec![id]);
    }

    let ids: Vec<AgentId> = cli.tasks.iter().map(|_| core.new_session()).collect();
    if let Some(first) = ids.first() {
        mirror_to_stdout(core, first)?;
    }
    for (id, task) in ids.iter().zip(&cli.tasks) {
        match core.start_session(id, task, &cli.cwd).await {
            Ok(session) => tracing::info!(
                agent_id = %id,
                working_dir = %session.working_dir.display(),
                "Agent started"
            ),
            Err(e) => eprintln!("{id}: {e}"),
        }
    }
    Ok(ids)
}

fn mirror_to_stdout(core: &SonarCore, id: &AgentId) -> anyhow::Result<()> {
    let (sink, mut rx) = ChannelSink::new();
    core.attach_sink(id, Arc::new(sink))?;
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(bytes) = rx.recv().await {
            if stdout.write_all(&bytes).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

/// Pass terminal input through to session `id`
///
/// Stdin is read on a plain thread so a blocked read never holds up
/// runtime shutdown.
fn forward_stdin(core: Arc<SonarCore>, id: AgentId) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if core.facade().write(&id, &data).await.is_err() {
                break;
            }
        }
    });
}

fn start_transcript_watcher(
    core: &SonarCore,
    events: mpsc::UnboundedSender<HostEvent>,
) -> Option<WatcherHandle> {
    let Some(root) = core.config().resolve_projects_dir() else {
        tracing::warn!("No transcript directory found, transcript watching disabled");
        return None;
    };
    let tracker = TranscriptTracker::new(core.registry().clone(), core.pricing().clone());
    match TranscriptWatcher::start(&root, tracker, events, DEFAULT_DEBOUNCE_MS) {
        Ok(handle) => Some(handle),
        Err(e) => {
            e.trace_error("start transcript watcher");
            None
        }
    }
}

/// Resolve once no run is active and no process is left
async fn wait_until_done(core: &SonarCore, host: &PtyHost) {
    let mut changes = core.registry().subscribe();
    let mut poll = tokio::time::interval(WAIT_POLL);
    loop {
        if !core.any_active() && host.process_count() == 0 {
            return;
        }
        tokio::select! {
            _ = changes.recv() => {}
            _ = poll.tick() => {}
        }
    }
}

async fn shutdown_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot register SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

/// One line per session followed by the fleet headline
pub fn summary_report(sessions: &[AgentSession]) -> String {
    let mut report = String::new();
    for session in sessions {
        report.push_str(&session_line(session));
        report.push('\n');
    }
    report.push_str(&FleetTotals::from_sessions(sessions).headline());
    report.push('\n');
    report
}

/// Write records as JSON lines, replacing `path`
pub fn write_export(path: &Path, records: &[SessionRecord]) -> anyhow::Result<()> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("writing export to {}", path.display()))
}
