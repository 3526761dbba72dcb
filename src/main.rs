//! GDB/MI session runner
//!
//! Starts GDB for one launch description and streams the session's events to
//! stdout as JSON lines. Logs go to stderr.
//!
//! Usage:
//!   gdbmi-session session.json
//!
//! ```json
//! {
//!   "session": { "gdb_path": "gdb", "timeout_ms": 30000 },
//!   "launch": { "mode": "run", "program": "./a.out", "breakpoints": [{ "location": "main.c:10" }] }
//! }
//! ```

use anyhow::{Context, Result};
use gdbmi_session::gdb::{
    launch, CommandSet, GdbClient, LaunchContext, SessionEvent, SessionFile, Toolchain,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path: PathBuf = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: gdbmi-session <session.json>")?;
    let file = SessionFile::load(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    let toolchain = Toolchain::resolve(&file.session)?;
    let profile = toolchain.detect_profile(&file.session).await?;
    let commands = CommandSet::for_dialect(profile.dialect);

    let client = Arc::new(GdbClient::spawn(&file.session, &toolchain, commands).await?);
    let mut printer = tokio::spawn(print_events(client.subscribe()));

    // Ctrl-C stops the launch between steps, or ends a running session
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted");
                cancel.cancel();
            }
        })
    };

    let mut ctx = LaunchContext::new(Arc::clone(&client), file.launch);
    let launched = launch(&mut ctx, &cancel).await;

    match &launched {
        Ok(()) => {
            info!(
                services = ?ctx.services.started(),
                breakpoints = ctx.breakpoints.len(),
                "Session ready, Ctrl-C to end"
            );
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = &mut printer => info!("Debugger session ended"),
            }
        }
        Err(e) => error!(
            started = ?ctx.services.started(),
            "Launch failed: {}", e
        ),
    }
    interrupt.abort();

    client.shutdown().await?;
    if !printer.is_finished() {
        let _ = printer.await;
    }

    launched.context("launch failed")?;
    Ok(())
}

/// Write each decodable event as one JSON line until the session disconnects.
async fn print_events(mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        let Some(decoded) = event.decode() else {
            continue;
        };
        match serde_json::to_string(&decoded) {
            Ok(line) => {
                let mut out = stdout.lock();
                if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
    }
}
