use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use tracing::info;

use crate::actor::Actor;
use crate::db;
use crate::notify::Notifier;
use crate::period::Clock;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    /// Authenticated caller, filled in by whoever terminated the session.
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Option<Notifier>,
    pub notify_enabled: bool,
}

impl AppState {
    pub fn new(clock: Arc<dyn Clock>, notify_enabled: bool) -> Self {
        Self {
            workspace: None,
            db: None,
            clock,
            notifier: None,
            notify_enabled,
        }
    }

    /// Opens (creating if needed) the workspace database and restarts the
    /// notification worker against it.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        let conn = db::open_db(path)?;
        if let Some(old) = self.notifier.take() {
            old.shutdown();
        }
        if self.notify_enabled {
            self.notifier = Some(Notifier::spawn(db::db_path(path))?);
        }
        self.db = Some(conn);
        self.workspace = Some(path.to_path_buf());
        info!(workspace = %path.display(), notify = self.notify_enabled, "workspace opened");
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if let Some(n) = self.notifier.take() {
            n.shutdown();
        }
    }
}
