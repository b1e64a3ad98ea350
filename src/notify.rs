//! Post-commit notification worker and the per-user inbox.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use anyhow::Context;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db;
use crate::directory;
use crate::error::CoreResult;

pub const TEACHING_ASSIGNED: &str = "teaching_assigned";
pub const TEACHING_REASSIGNED: &str = "teaching_reassigned";
pub const TEACHING_UNASSIGNED: &str = "teaching_unassigned";
pub const HOMEROOM_ASSIGNED: &str = "homeroom_assigned";
pub const HOMEROOM_UNASSIGNED: &str = "homeroom_unassigned";
pub const ATTENDANCE_EXPORTED: &str = "attendance_exported";
pub const TEACHER_DELETED: &str = "teacher_deleted";
pub const SUBJECT_DELETED: &str = "subject_deleted";
pub const CLASS_DELETED: &str = "class_deleted";

#[derive(Debug, Clone)]
pub struct Notice {
    pub event_type: &'static str,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub recipients: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub event_type: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxPage {
    pub items: Vec<Notification>,
    pub total: i64,
    pub unread: i64,
    pub page: u32,
    pub per_page: u32,
}

/// Affected teachers, then the class's homeroom teacher, then every admin.
/// Duplicates are dropped and first-seen order is kept.
pub fn recipients(
    conn: &Connection,
    teachers: &[&str],
    class_id: Option<&str>,
) -> CoreResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |id: String| {
        if !out.contains(&id) {
            out.push(id);
        }
    };
    for t in teachers {
        push(t.to_string());
    }
    if let Some(class_id) = class_id {
        if let Some(h) = directory::homeroom_teacher_of(conn, class_id)?.flatten() {
            push(h);
        }
    }
    for admin in directory::admin_ids(conn)? {
        push(admin);
    }
    Ok(out)
}

fn persist(conn: &Connection, notice: &Notice) -> rusqlite::Result<()> {
    let payload = notice.payload.to_string();
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO notifications(id, recipient_id, event_type, title, body, payload, is_read, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?)",
        )?;
        for recipient in &notice.recipients {
            stmt.execute((
                Uuid::new_v4().to_string(),
                recipient,
                notice.event_type,
                &notice.title,
                &notice.body,
                &payload,
                &notice.created_at,
            ))?;
        }
    }
    tx.commit()
}

fn open_worker_db(path: &Path) -> anyhow::Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open notification db {}", path.display()))?;
    db::configure(&conn).context("configure notification db")?;
    Ok(conn)
}

fn run_worker(path: PathBuf, rx: Receiver<Notice>) {
    let mut conn: Option<Connection> = None;
    for notice in rx {
        if conn.is_none() {
            match open_worker_db(&path) {
                Ok(c) => conn = Some(c),
                Err(e) => {
                    warn!(event = notice.event_type, error = %format!("{e:#}"), "notification dropped");
                    continue;
                }
            }
        }
        let Some(c) = conn.as_ref() else { continue };
        match persist(c, &notice) {
            Ok(()) => debug!(
                event = notice.event_type,
                recipients = notice.recipients.len(),
                "notification stored"
            ),
            Err(e) => warn!(event = notice.event_type, error = %e, "notification dropped"),
        }
    }
}

/// Handle to the background worker of one workspace.
pub struct Notifier {
    tx: Option<Sender<Notice>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn spawn(db_path: PathBuf) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = std::thread::Builder::new()
            .name("absensid-notify".to_string())
            .spawn(move || run_worker(db_path, rx))
            .context("spawn notification worker")?;
        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Never blocks and never fails the caller.
    pub fn dispatch(&self, notice: Notice) {
        if notice.recipients.is_empty() {
            return;
        }
        let Some(tx) = self.tx.as_ref() else { return };
        if let Err(e) = tx.send(notice) {
            warn!(event = e.0.event_type, "notification worker is gone");
        }
    }

    /// Drains what is already queued, then stops the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("notification worker panicked");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn list_inbox(
    conn: &Connection,
    recipient_id: &str,
    unread_only: bool,
    page: u32,
    per_page: u32,
) -> CoreResult<InboxPage> {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 200);
    let offset = i64::from(page - 1) * i64::from(per_page);

    let (total, unread): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), IFNULL(SUM(CASE WHEN is_read = 0 THEN 1 ELSE 0 END), 0)
         FROM notifications WHERE recipient_id = ?",
        [recipient_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;

    let mut stmt = conn.prepare(
        "SELECT id, recipient_id, event_type, title, body, payload, is_read, created_at
         FROM notifications
         WHERE recipient_id = ?1 AND (?2 = 0 OR is_read = 0)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3 OFFSET ?4",
    )?;
    let items = stmt
        .query_map(
            (recipient_id, unread_only as i64, i64::from(per_page), offset),
            |r| {
                let payload: String = r.get(5)?;
                Ok(Notification {
                    id: r.get(0)?,
                    recipient_id: r.get(1)?,
                    event_type: r.get(2)?,
                    title: r.get(3)?,
                    body: r.get(4)?,
                    payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                    read: r.get::<_, i64>(6)? != 0,
                    created_at: r.get(7)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(InboxPage {
        items,
        total,
        unread,
        page,
        per_page,
    })
}

/// Marks the given ids read, or the whole inbox when `ids` is `None`.
/// Ids that belong to someone else are ignored.
pub fn mark_read(conn: &Connection, recipient_id: &str, ids: Option<&[String]>) -> CoreResult<usize> {
    let Some(ids) = ids else {
        return Ok(conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ? AND is_read = 0",
            [recipient_id],
        )?);
    };
    let tx = conn.unchecked_transaction()?;
    let mut n = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE notifications SET is_read = 1 WHERE id = ? AND recipient_id = ? AND is_read = 0",
        )?;
        for id in ids {
            n += stmt.execute((id, recipient_id))?;
        }
    }
    tx.commit()?;
    Ok(n)
}
