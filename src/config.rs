use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::period::{self, Clock, FixedClock, SystemClock};

/// Attendance authorization sidecar: one JSON request per stdin line, one
/// JSON response per stdout line.
#[derive(Parser, Debug, Clone)]
#[command(name = "absensid", version)]
pub struct Cli {
    /// Workspace directory to open at startup
    #[arg(long, env = "ABSENSID_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Pin the calendar date (YYYY-MM-DD) used for academic periods
    #[arg(long, env = "ABSENSID_TODAY")]
    pub today: Option<String>,

    /// Log filter, e.g. `info` or `absensid=debug`; falls back to RUST_LOG
    #[arg(long, env = "ABSENSID_LOG")]
    pub log: Option<String>,

    /// Do not start the notification worker
    #[arg(long)]
    pub no_notify: bool,
}

impl Cli {
    pub fn clock(&self) -> anyhow::Result<Arc<dyn Clock>> {
        match self.today.as_deref() {
            Some(raw) => {
                let date = period::parse_date(raw).context("--today")?;
                Ok(Arc::new(FixedClock::new(date)))
            }
            None => Ok(Arc::new(SystemClock)),
        }
    }

    pub fn env_filter(&self) -> EnvFilter {
        self.log
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .or_else(|| EnvFilter::try_from_default_env().ok())
            .unwrap_or_else(|| EnvFilter::new("info"))
    }
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_logging(cli: &Cli) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(cli.env_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
