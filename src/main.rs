mod actor;
mod config;
mod db;
mod directory;
mod error;
mod ipc;
mod ledger;
mod notify;
mod period;
mod policy;
mod registry;
mod roles;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let cli = config::Cli::parse();
    config::init_logging(&cli);

    let mut state = ipc::AppState::new(cli.clock()?, !cli.no_notify);
    if let Some(ws) = cli.workspace.as_deref() {
        state
            .open_workspace(ws)
            .with_context(|| format!("open workspace {}", ws.display()))?;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        today = %state.clock.today(),
        "absensid ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{resp}");
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    state.shutdown();
    Ok(())
}
