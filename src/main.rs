//! agent-sonar binary
//!
//! Run with: cargo run -- "fix the failing tests"
//!
//! For help: cargo run -- --help

use std::io::IsTerminal;

use agent_sonar::{Cli, run_with_cli, shutdown_otel};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // SIGINT/SIGTERM are handled inside the runner so sessions get cleaned up
    let result = run_with_cli(&cli).await;

    // Flush pending spans before exiting
    shutdown_otel();

    if let Err(e) = result {
        eprintln!("Error: {e:#}");

        if std::io::stderr().is_terminal() {
            eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
            eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        }

        std::process::exit(1);
    }

    Ok(())
}
