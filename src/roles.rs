use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    #[serde(alias = "guru_mapel")]
    SubjectTeacher,
    #[serde(alias = "wali_kelas")]
    HomeroomTeacher,
}

impl RoleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoleKind::SubjectTeacher => "subject_teacher",
            RoleKind::HomeroomTeacher => "homeroom_teacher",
        }
    }

    fn from_db(raw: &str) -> RoleKind {
        match raw {
            "homeroom_teacher" => RoleKind::HomeroomTeacher,
            _ => RoleKind::SubjectTeacher,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRow {
    pub teacher_id: String,
    pub role_kind: RoleKind,
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
}

fn upsert(
    conn: &Connection,
    teacher_id: &str,
    kind: RoleKind,
    class_id: Option<&str>,
    subject_id: Option<&str>,
) -> CoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO teacher_roles(id, teacher_id, role_kind, class_id, subject_id)
         VALUES(?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            teacher_id,
            kind.as_str(),
            class_id,
            subject_id,
        ),
    )?;
    Ok(())
}

fn remove(
    conn: &Connection,
    teacher_id: &str,
    kind: RoleKind,
    class_id: Option<&str>,
    subject_id: Option<&str>,
) -> CoreResult<()> {
    conn.execute(
        "DELETE FROM teacher_roles
         WHERE teacher_id = ? AND role_kind = ?
           AND IFNULL(class_id, '') = IFNULL(?, '')
           AND IFNULL(subject_id, '') = IFNULL(?, '')",
        (teacher_id, kind.as_str(), class_id, subject_id),
    )?;
    Ok(())
}

/// Re-derives the `subject_teacher` row for one (teacher, class, subject):
/// present iff any teaching assignment for the triple remains, in any period.
pub fn sync_subject_teacher(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
    subject_id: &str,
) -> CoreResult<()> {
    let backing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM teaching_assignments
         WHERE teacher_id = ? AND class_id = ? AND subject_id = ?",
        (teacher_id, class_id, subject_id),
        |r| r.get(0),
    )?;
    if backing > 0 {
        upsert(conn, teacher_id, RoleKind::SubjectTeacher, Some(class_id), Some(subject_id))
    } else {
        remove(conn, teacher_id, RoleKind::SubjectTeacher, Some(class_id), Some(subject_id))
    }
}

/// Re-derives every `homeroom_teacher` row of one teacher from `classes`.
pub fn sync_homeroom_teacher(conn: &Connection, teacher_id: &str) -> CoreResult<()> {
    conn.execute(
        "DELETE FROM teacher_roles
         WHERE teacher_id = ?1 AND role_kind = 'homeroom_teacher'
           AND IFNULL(class_id, '') NOT IN (
             SELECT id FROM classes WHERE homeroom_teacher_id = ?1
           )",
        [teacher_id],
    )?;
    let mut stmt = conn.prepare("SELECT id FROM classes WHERE homeroom_teacher_id = ?")?;
    let classes = stmt
        .query_map([teacher_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for class_id in classes {
        upsert(conn, teacher_id, RoleKind::HomeroomTeacher, Some(&class_id), None)?;
    }
    Ok(())
}

pub fn roles_of(conn: &Connection, teacher_id: &str) -> CoreResult<Vec<RoleRow>> {
    let mut stmt = conn.prepare(
        "SELECT teacher_id, role_kind, class_id, subject_id
         FROM teacher_roles
         WHERE teacher_id = ?
         ORDER BY role_kind, IFNULL(class_id, ''), IFNULL(subject_id, '')",
    )?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            let kind: String = r.get(1)?;
            Ok(RoleRow {
                teacher_id: r.get(0)?,
                role_kind: RoleKind::from_db(&kind),
                class_id: r.get(2)?,
                subject_id: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Coarse classification only; assignment validity is always decided from the
/// registry tables themselves.
pub fn has_role(conn: &Connection, teacher_id: &str, kind: RoleKind) -> CoreResult<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM teacher_roles WHERE teacher_id = ? AND role_kind = ?",
        (teacher_id, kind.as_str()),
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

#[cfg(test)]
pub fn all_rows(conn: &Connection) -> Vec<RoleRow> {
    let mut stmt = conn
        .prepare(
            "SELECT teacher_id, role_kind, class_id, subject_id FROM teacher_roles
             ORDER BY teacher_id, role_kind, IFNULL(class_id, ''), IFNULL(subject_id, '')",
        )
        .expect("prepare");
    stmt.query_map([], |r| {
        let kind: String = r.get(1)?;
        Ok(RoleRow {
            teacher_id: r.get(0)?,
            role_kind: RoleKind::from_db(&kind),
            class_id: r.get(2)?,
            subject_id: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .expect("query roles")
}
