use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::period::{AcademicPeriod, Semester};

pub const DB_FILE: &str = "absensi.sqlite3";

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = Connection::open(db_path(workspace))?;
    configure(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Connection settings shared by the request connection and the notification worker.
pub fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(())
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            nip TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade_level TEXT,
            academic_year TEXT,
            homeroom_teacher_id TEXT,
            FOREIGN KEY(homeroom_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    // One homeroom class per teacher.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_classes_homeroom_teacher
         ON classes(homeroom_teacher_id)
         WHERE homeroom_teacher_id IS NOT NULL",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            nisn TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_members(
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(class_id, student_id),
            UNIQUE(student_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teaching_assignments(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, subject_id, academic_year, semester),
            UNIQUE(teacher_id, subject_id, class_id, academic_year, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teaching_assignments_teacher
         ON teaching_assignments(teacher_id, class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_roles(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            role_kind TEXT NOT NULL,
            class_id TEXT,
            subject_id TEXT,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_teacher_roles_key
         ON teacher_roles(teacher_id, role_kind, IFNULL(class_id, ''), IFNULL(subject_id, ''))",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            subject_id TEXT,
            teacher_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT,
            academic_year TEXT NOT NULL,
            semester TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            CHECK((kind = 'subject') = (subject_id IS NOT NULL))
        )",
        [],
    )?;
    // One entry per student per lesson/day.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_records_slot
         ON attendance_records(student_id, date, kind, class_id, IFNULL(subject_id, ''))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_class_subject
         ON attendance_records(class_id, subject_id, student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            recipient_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            payload TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_recipient
         ON notifications(recipient_id, created_at)",
        [],
    )?;

    Ok(())
}

/// Write transaction that takes the database write lock up front, so a
/// check-then-insert sequence cannot interleave with another writer.
pub fn immediate_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

/// Reads an `(academic_year, semester)` column pair starting at `idx`.
pub fn period_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<AcademicPeriod> {
    let year: String = row.get(idx)?;
    let raw: String = row.get(idx + 1)?;
    let semester = Semester::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx + 1,
            Type::Text,
            format!("unknown semester {raw:?}").into(),
        )
    })?;
    Ok(AcademicPeriod { year, semester })
}

#[cfg(test)]
pub fn open_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    configure(&conn).expect("configure db");
    init_schema(&conn).expect("init schema");
    conn
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = open_memory();
        init_schema(&conn).expect("second init");
    }

    #[test]
    fn open_db_creates_workspace_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = dir.path().join("nested");
        let _conn = open_db(&ws).expect("open");
        assert!(db_path(&ws).is_file());
    }

    #[test]
    fn attendance_subject_presence_is_checked_by_storage() {
        let conn = open_memory();
        conn.execute_batch(
            "INSERT INTO teachers(id, name, email) VALUES('t1', 'T', 't@x');
             INSERT INTO classes(id, name) VALUES('c1', '7A');
             INSERT INTO students(id, name, nisn) VALUES('s1', 'S', '001');",
        )
        .expect("seed");
        let res = conn.execute(
            "INSERT INTO attendance_records(id, student_id, class_id, subject_id, teacher_id, kind,
               date, status, academic_year, semester, created_at, updated_at)
             VALUES('r1', 's1', 'c1', NULL, 't1', 'subject', '2025-09-01', 'present',
               '2025/2026', 'odd', 'x', 'x')",
            [],
        );
        assert!(res.is_err());
    }
}
