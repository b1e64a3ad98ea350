//! Teaching and homeroom assignments, written together with the role projection.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::actor::Actor;
use crate::db;
use crate::directory;
use crate::error::{CoreError, CoreResult};
use crate::period::AcademicPeriod;
use crate::policy::{self, Facts, Operation};
use crate::roles::{self, RoleRow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeachingAssignment {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub period: AcademicPeriod,
}

/// Target of an assign or reassign call.
#[derive(Debug, Clone)]
pub struct TeachingSlot {
    pub teacher_id: String,
    pub subject_id: String,
    pub class_id: String,
    pub period: AcademicPeriod,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reassignment {
    pub previous: TeachingAssignment,
    pub current: TeachingAssignment,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeroomChange {
    pub class_id: String,
    pub teacher_id: Option<String>,
    /// Teacher who held the class before this call, if different.
    pub previous_teacher_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Homeroom {
    pub class_id: String,
    pub class_name: String,
    pub teacher_id: Option<String>,
    pub teacher_name: Option<String>,
}

/// What a directory delete took with it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub id: String,
    pub assignments: Vec<TeachingAssignment>,
    pub homeroom: Option<HomeroomChange>,
    pub unenrolled: Vec<String>,
}

impl Removal {
    /// Teachers who lost an assignment or a homeroom class, deduplicated.
    pub fn affected_teachers(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let homeroom = self
            .homeroom
            .as_ref()
            .and_then(|h| h.previous_teacher_id.as_deref());
        for t in self.assignments.iter().map(|a| a.teacher_id.as_str()).chain(homeroom) {
            if !out.contains(&t) {
                out.push(t);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentFilter {
    pub teacher_id: Option<String>,
    pub class_id: Option<String>,
    pub period: Option<AcademicPeriod>,
}

/// Result of a subject lookup. `fallback` is set when the strict-period
/// lookup found nothing and the set came from the unscoped retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectLookup {
    pub subjects: BTreeSet<String>,
    pub fallback: bool,
}

const ASSIGNMENT_COLS: &str = "id, teacher_id, subject_id, class_id, academic_year, semester";

fn assignment_from_row(r: &Row<'_>) -> rusqlite::Result<TeachingAssignment> {
    Ok(TeachingAssignment {
        id: r.get(0)?,
        teacher_id: r.get(1)?,
        subject_id: r.get(2)?,
        class_id: r.get(3)?,
        period: db::period_at(r, 4)?,
    })
}

fn require_admin(actor: &Actor, op: Operation) -> CoreResult<()> {
    policy::enforce(actor, op, &Facts::default())
}

fn require_slot_refs(conn: &Connection, slot: &TeachingSlot) -> CoreResult<()> {
    directory::require_teacher(conn, &slot.teacher_id)?;
    directory::require_subject(conn, &slot.subject_id)?;
    directory::require_class(conn, &slot.class_id)
}

/// Id of the assignment holding `(class, subject, period)`, if any.
fn slot_holder(conn: &Connection, slot: &TeachingSlot) -> CoreResult<Option<(String, String)>> {
    Ok(conn
        .query_row(
            "SELECT id, teacher_id FROM teaching_assignments
             WHERE class_id = ? AND subject_id = ? AND academic_year = ? AND semester = ?",
            (
                &slot.class_id,
                &slot.subject_id,
                &slot.period.year,
                slot.period.semester.as_str(),
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?)
}

/// The slot indexes turn a writer that slipped past `slot_holder` into a
/// conflict rather than a second row.
fn insert_assignment(conn: &Connection, assignment: &TeachingAssignment) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO teaching_assignments(id, teacher_id, subject_id, class_id, academic_year, semester)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &assignment.id,
            &assignment.teacher_id,
            &assignment.subject_id,
            &assignment.class_id,
            &assignment.period.year,
            assignment.period.semester.as_str(),
        ),
    )?;
    Ok(())
}

/// Points `class_id` at `teacher_id`. A teacher already holding another class
/// fails on `idx_classes_homeroom_teacher` with a conflict.
fn set_homeroom(conn: &Connection, teacher_id: &str, class_id: &str) -> CoreResult<()> {
    // Clear before set so a stale value never survives a partial write.
    conn.execute(
        "UPDATE classes SET homeroom_teacher_id = NULL WHERE id = ?",
        [class_id],
    )?;
    conn.execute(
        "UPDATE classes SET homeroom_teacher_id = ? WHERE id = ?",
        (teacher_id, class_id),
    )?;
    Ok(())
}

pub fn get_assignment(conn: &Connection, id: &str) -> CoreResult<TeachingAssignment> {
    conn.query_row(
        &format!("SELECT {ASSIGNMENT_COLS} FROM teaching_assignments WHERE id = ?"),
        [id],
        assignment_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("teaching assignment {id} not found")))
}

pub fn assign_teaching(
    conn: &Connection,
    actor: &Actor,
    slot: &TeachingSlot,
) -> CoreResult<TeachingAssignment> {
    require_admin(actor, Operation::AssignTeaching)?;
    let tx = db::immediate_tx(conn)?;
    require_slot_refs(&tx, slot)?;

    if let Some((_, holder)) = slot_holder(&tx, slot)? {
        return Err(CoreError::Conflict(if holder == slot.teacher_id {
            format!(
                "teacher {} already teaches subject {} in class {} for {}",
                slot.teacher_id, slot.subject_id, slot.class_id, slot.period
            )
        } else {
            format!(
                "subject {} in class {} for {} is already assigned to teacher {holder}",
                slot.subject_id, slot.class_id, slot.period
            )
        }));
    }

    let assignment = TeachingAssignment {
        id: Uuid::new_v4().to_string(),
        teacher_id: slot.teacher_id.clone(),
        subject_id: slot.subject_id.clone(),
        class_id: slot.class_id.clone(),
        period: slot.period.clone(),
    };
    insert_assignment(&tx, &assignment)?;
    roles::sync_subject_teacher(&tx, &slot.teacher_id, &slot.class_id, &slot.subject_id)?;
    tx.commit()?;

    info!(
        assignment = %assignment.id,
        teacher = %assignment.teacher_id,
        subject = %assignment.subject_id,
        class = %assignment.class_id,
        period = %assignment.period,
        "teaching assigned"
    );
    Ok(assignment)
}

pub fn reassign_teaching(
    conn: &Connection,
    actor: &Actor,
    assignment_id: &str,
    slot: &TeachingSlot,
) -> CoreResult<Reassignment> {
    require_admin(actor, Operation::ReassignTeaching)?;
    let tx = db::immediate_tx(conn)?;
    let previous = get_assignment(&tx, assignment_id)?;
    require_slot_refs(&tx, slot)?;

    if let Some((holder_id, holder)) = slot_holder(&tx, slot)? {
        if holder_id != assignment_id {
            return Err(CoreError::Conflict(format!(
                "subject {} in class {} for {} is already assigned to teacher {holder}",
                slot.subject_id, slot.class_id, slot.period
            )));
        }
    }

    tx.execute(
        "UPDATE teaching_assignments
         SET teacher_id = ?, subject_id = ?, class_id = ?, academic_year = ?, semester = ?
         WHERE id = ?",
        (
            &slot.teacher_id,
            &slot.subject_id,
            &slot.class_id,
            &slot.period.year,
            slot.period.semester.as_str(),
            assignment_id,
        ),
    )?;
    roles::sync_subject_teacher(&tx, &previous.teacher_id, &previous.class_id, &previous.subject_id)?;
    roles::sync_subject_teacher(&tx, &slot.teacher_id, &slot.class_id, &slot.subject_id)?;
    tx.commit()?;

    let current = TeachingAssignment {
        id: previous.id.clone(),
        teacher_id: slot.teacher_id.clone(),
        subject_id: slot.subject_id.clone(),
        class_id: slot.class_id.clone(),
        period: slot.period.clone(),
    };
    info!(
        assignment = %current.id,
        from_teacher = %previous.teacher_id,
        to_teacher = %current.teacher_id,
        subject = %current.subject_id,
        class = %current.class_id,
        period = %current.period,
        "teaching reassigned"
    );
    Ok(Reassignment { previous, current })
}

pub fn unassign_teaching(
    conn: &Connection,
    actor: &Actor,
    assignment_id: &str,
) -> CoreResult<TeachingAssignment> {
    require_admin(actor, Operation::UnassignTeaching)?;
    let tx = db::immediate_tx(conn)?;
    let removed = get_assignment(&tx, assignment_id)?;
    tx.execute("DELETE FROM teaching_assignments WHERE id = ?", [assignment_id])?;
    roles::sync_subject_teacher(&tx, &removed.teacher_id, &removed.class_id, &removed.subject_id)?;
    tx.commit()?;

    info!(
        assignment = %removed.id,
        teacher = %removed.teacher_id,
        subject = %removed.subject_id,
        class = %removed.class_id,
        "teaching unassigned"
    );
    Ok(removed)
}

pub fn assign_homeroom(
    conn: &Connection,
    actor: &Actor,
    teacher_id: &str,
    class_id: &str,
) -> CoreResult<HomeroomChange> {
    require_admin(actor, Operation::AssignHomeroom)?;
    let tx = db::immediate_tx(conn)?;
    directory::require_teacher(&tx, teacher_id)?;
    directory::require_class(&tx, class_id)?;

    if let Some(held) = directory::homeroom_class_of(&tx, teacher_id)? {
        return Err(CoreError::Conflict(format!(
            "teacher {teacher_id} is already homeroom teacher of class {held}; unassign it first"
        )));
    }
    let previous = directory::homeroom_teacher_of(&tx, class_id)?.flatten();

    set_homeroom(&tx, teacher_id, class_id)?;
    roles::sync_homeroom_teacher(&tx, teacher_id)?;
    if let Some(prev) = previous.as_deref() {
        roles::sync_homeroom_teacher(&tx, prev)?;
    }
    tx.commit()?;

    info!(class = %class_id, teacher = %teacher_id, displaced = ?previous, "homeroom assigned");
    Ok(HomeroomChange {
        class_id: class_id.to_string(),
        teacher_id: Some(teacher_id.to_string()),
        previous_teacher_id: previous,
    })
}

pub fn unassign_homeroom(
    conn: &Connection,
    actor: &Actor,
    class_id: &str,
) -> CoreResult<HomeroomChange> {
    require_admin(actor, Operation::UnassignHomeroom)?;
    let tx = db::immediate_tx(conn)?;
    let Some(current) = directory::homeroom_teacher_of(&tx, class_id)? else {
        return Err(CoreError::NotFound(format!("class {class_id} not found")));
    };
    let Some(teacher_id) = current else {
        return Err(CoreError::InvalidState(format!(
            "class {class_id} has no homeroom teacher"
        )));
    };

    tx.execute(
        "UPDATE classes SET homeroom_teacher_id = NULL WHERE id = ?",
        [class_id],
    )?;
    roles::sync_homeroom_teacher(&tx, &teacher_id)?;
    tx.commit()?;

    info!(class = %class_id, teacher = %teacher_id, "homeroom unassigned");
    Ok(HomeroomChange {
        class_id: class_id.to_string(),
        teacher_id: None,
        previous_teacher_id: Some(teacher_id),
    })
}

fn assignments_on(
    conn: &Connection,
    entity: directory::Entity,
    id: &str,
) -> CoreResult<Vec<TeachingAssignment>> {
    let column = match entity {
        directory::Entity::Teacher => "teacher_id",
        directory::Entity::Subject => "subject_id",
        directory::Entity::Class => "class_id",
        directory::Entity::Student => return Ok(Vec::new()),
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSIGNMENT_COLS} FROM teaching_assignments WHERE {column} = ?
         ORDER BY class_id, subject_id, academic_year, semester"
    ))?;
    let rows = stmt
        .query_map([id], assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn drop_assignments(conn: &Connection, assignments: &[TeachingAssignment]) -> CoreResult<()> {
    for a in assignments {
        conn.execute("DELETE FROM teaching_assignments WHERE id = ?", [&a.id])?;
        roles::sync_subject_teacher(conn, &a.teacher_id, &a.class_id, &a.subject_id)?;
    }
    Ok(())
}

fn clear_homeroom(conn: &Connection, class_id: &str, teacher_id: String) -> CoreResult<HomeroomChange> {
    conn.execute(
        "UPDATE classes SET homeroom_teacher_id = NULL WHERE id = ?",
        [class_id],
    )?;
    roles::sync_homeroom_teacher(conn, &teacher_id)?;
    Ok(HomeroomChange {
        class_id: class_id.to_string(),
        teacher_id: None,
        previous_teacher_id: Some(teacher_id),
    })
}

/// Deletes a teacher with their assignments and homeroom class, refusing
/// while attendance records name them.
pub fn delete_teacher(conn: &Connection, actor: &Actor, teacher_id: &str) -> CoreResult<Removal> {
    require_admin(actor, Operation::ManageDirectory)?;
    let tx = db::immediate_tx(conn)?;
    directory::require_teacher(&tx, teacher_id)?;
    directory::ensure_no_attendance(&tx, directory::Entity::Teacher, teacher_id)?;

    let assignments = assignments_on(&tx, directory::Entity::Teacher, teacher_id)?;
    drop_assignments(&tx, &assignments)?;
    let homeroom = match directory::homeroom_class_of(&tx, teacher_id)? {
        Some(class_id) => Some(clear_homeroom(&tx, &class_id, teacher_id.to_string())?),
        None => None,
    };
    // No projection row may outlive its teacher.
    tx.execute("DELETE FROM teacher_roles WHERE teacher_id = ?", [teacher_id])?;
    tx.execute("DELETE FROM teachers WHERE id = ?", [teacher_id])?;
    tx.commit()?;

    info!(
        teacher = %teacher_id,
        assignments = assignments.len(),
        homeroom = ?homeroom.as_ref().map(|h| &h.class_id),
        "teacher deleted"
    );
    Ok(Removal {
        id: teacher_id.to_string(),
        assignments,
        homeroom,
        unenrolled: Vec::new(),
    })
}

pub fn delete_subject(conn: &Connection, actor: &Actor, subject_id: &str) -> CoreResult<Removal> {
    require_admin(actor, Operation::ManageDirectory)?;
    let tx = db::immediate_tx(conn)?;
    directory::require_subject(&tx, subject_id)?;
    directory::ensure_no_attendance(&tx, directory::Entity::Subject, subject_id)?;

    let assignments = assignments_on(&tx, directory::Entity::Subject, subject_id)?;
    drop_assignments(&tx, &assignments)?;
    tx.execute("DELETE FROM subjects WHERE id = ?", [subject_id])?;
    tx.commit()?;

    info!(subject = %subject_id, assignments = assignments.len(), "subject deleted");
    Ok(Removal {
        id: subject_id.to_string(),
        assignments,
        homeroom: None,
        unenrolled: Vec::new(),
    })
}

/// Deletes a class with its assignments, homeroom link and roster.
pub fn delete_class(conn: &Connection, actor: &Actor, class_id: &str) -> CoreResult<Removal> {
    require_admin(actor, Operation::ManageDirectory)?;
    let tx = db::immediate_tx(conn)?;
    let Some(current) = directory::homeroom_teacher_of(&tx, class_id)? else {
        return Err(CoreError::NotFound(format!("class {class_id} not found")));
    };
    directory::ensure_no_attendance(&tx, directory::Entity::Class, class_id)?;

    let assignments = assignments_on(&tx, directory::Entity::Class, class_id)?;
    drop_assignments(&tx, &assignments)?;
    let homeroom = match current {
        Some(teacher_id) => Some(clear_homeroom(&tx, class_id, teacher_id)?),
        None => None,
    };
    let unenrolled = directory::roster_of(&tx, class_id)?;
    tx.execute("DELETE FROM class_members WHERE class_id = ?", [class_id])?;
    tx.execute("DELETE FROM classes WHERE id = ?", [class_id])?;
    tx.commit()?;

    info!(
        class = %class_id,
        assignments = assignments.len(),
        students = unenrolled.len(),
        "class deleted"
    );
    Ok(Removal {
        id: class_id.to_string(),
        assignments,
        homeroom,
        unenrolled,
    })
}

fn subjects_where(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
    period: Option<&AcademicPeriod>,
) -> CoreResult<BTreeSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT subject_id FROM teaching_assignments
         WHERE teacher_id = ?1 AND class_id = ?2
           AND (?3 IS NULL OR (academic_year = ?3 AND semester = ?4))",
    )?;
    let year = period.map(|p| p.year.as_str());
    let semester = period.map(|p| p.semester.as_str());
    let set = stmt
        .query_map((teacher_id, class_id, year, semester), |r| r.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(set)
}

/// Subjects `teacher_id` teaches in `class_id`. With a period, the strict
/// lookup runs first and the unscoped one only when it comes back empty.
pub fn lookup_teaching_subjects(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
    period: Option<&AcademicPeriod>,
) -> CoreResult<SubjectLookup> {
    let Some(period) = period else {
        return Ok(SubjectLookup {
            subjects: subjects_where(conn, teacher_id, class_id, None)?,
            fallback: false,
        });
    };
    let strict = subjects_where(conn, teacher_id, class_id, Some(period))?;
    if !strict.is_empty() {
        return Ok(SubjectLookup {
            subjects: strict,
            fallback: false,
        });
    }
    Ok(SubjectLookup {
        subjects: subjects_where(conn, teacher_id, class_id, None)?,
        fallback: true,
    })
}

fn periods_of(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
    subject_id: Option<&str>,
) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT academic_year, semester FROM teaching_assignments
         WHERE teacher_id = ?1 AND class_id = ?2 AND (?3 IS NULL OR subject_id = ?3)
         ORDER BY academic_year, semester",
    )?;
    let periods = stmt
        .query_map((teacher_id, class_id, subject_id), |r| {
            Ok(db::period_at(r, 0)?.to_string())
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(periods)
}

/// Whether the teacher may record `subject_id` in `class_id` during `period`.
/// A grant that only the unscoped retry produced is logged as `period_fallback`.
pub fn teaches_subject(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
    subject_id: &str,
    period: &AcademicPeriod,
) -> CoreResult<bool> {
    let lookup = lookup_teaching_subjects(conn, teacher_id, class_id, Some(period))?;
    let granted = lookup.subjects.contains(subject_id);
    if granted && lookup.fallback {
        let matched = periods_of(conn, teacher_id, class_id, Some(subject_id))?;
        warn!(
            event = "period_fallback",
            teacher = %teacher_id,
            class = %class_id,
            subject = %subject_id,
            requested = %period,
            ?matched,
            "access granted by unscoped assignment lookup"
        );
    }
    Ok(granted)
}

fn pairs_where(
    conn: &Connection,
    teacher_id: &str,
    period: Option<&AcademicPeriod>,
) -> CoreResult<BTreeSet<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT class_id, subject_id FROM teaching_assignments
         WHERE teacher_id = ?1 AND (?2 IS NULL OR (academic_year = ?2 AND semester = ?3))",
    )?;
    let year = period.map(|p| p.year.as_str());
    let semester = period.map(|p| p.semester.as_str());
    let pairs = stmt
        .query_map((teacher_id, year, semester), |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(pairs)
}

/// Every `(class, subject)` pair the teacher teaches in `period`. Read scope
/// never takes the unscoped retry; only record entry does.
pub fn teaching_pairs(
    conn: &Connection,
    teacher_id: &str,
    period: &AcademicPeriod,
) -> CoreResult<BTreeSet<(String, String)>> {
    pairs_where(conn, teacher_id, Some(period))
}

pub fn list_assignments(
    conn: &Connection,
    actor: &Actor,
    filter: &AssignmentFilter,
) -> CoreResult<Vec<TeachingAssignment>> {
    let teacher_id = match (&filter.teacher_id, actor.is_admin()) {
        (Some(t), _) => Some(t.clone()),
        (None, true) => None,
        (None, false) => Some(actor.id.clone()),
    };
    policy::enforce(
        actor,
        Operation::ListAssignments,
        &Facts {
            target_teacher_id: teacher_id.clone(),
            ..Facts::default()
        },
    )?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ASSIGNMENT_COLS} FROM teaching_assignments
         WHERE (?1 IS NULL OR teacher_id = ?1)
           AND (?2 IS NULL OR class_id = ?2)
           AND (?3 IS NULL OR (academic_year = ?3 AND semester = ?4))
         ORDER BY class_id, subject_id, academic_year, semester"
    ))?;
    let year = filter.period.as_ref().map(|p| p.year.as_str());
    let semester = filter.period.as_ref().map(|p| p.semester.as_str());
    let rows = stmt
        .query_map(
            (teacher_id.as_deref(), filter.class_id.as_deref(), year, semester),
            assignment_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_homerooms(conn: &Connection, actor: &Actor) -> CoreResult<Vec<Homeroom>> {
    require_admin(actor, Operation::ListHomerooms)?;
    let mut stmt = conn.prepare(
        "SELECT c.id, c.name, c.homeroom_teacher_id, t.name
         FROM classes c
         LEFT JOIN teachers t ON t.id = c.homeroom_teacher_id
         ORDER BY c.name, c.id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Homeroom {
                class_id: r.get(0)?,
                class_name: r.get(1)?,
                teacher_id: r.get(2)?,
                teacher_name: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Projection rows of one teacher; admins may read anyone's.
pub fn roles_for(conn: &Connection, actor: &Actor, teacher_id: &str) -> CoreResult<Vec<RoleRow>> {
    policy::enforce(
        actor,
        Operation::ReadRoles,
        &Facts {
            target_teacher_id: Some(teacher_id.to_string()),
            ..Facts::default()
        },
    )?;
    directory::require_teacher(conn, teacher_id)?;
    roles::roles_of(conn, teacher_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Role;
    use crate::period::Semester;
    use crate::roles::RoleKind;

    struct Fixture {
        conn: Connection,
        admin: Actor,
        t1: String,
        t2: String,
        math: String,
        bio: String,
        c7a: String,
        c7b: String,
    }

    fn fixture() -> Fixture {
        let conn = db::open_memory();
        let admin = directory::create_admin(&conn, "Admin", "admin@school").expect("admin");
        let t1 = directory::create_teacher(&conn, "T1", "t1@school", None).expect("t1");
        let t2 = directory::create_teacher(&conn, "T2", "t2@school", None).expect("t2");
        let math = directory::create_subject(&conn, "Math", "MAT").expect("math");
        let bio = directory::create_subject(&conn, "Biology", "BIO").expect("bio");
        let c7a = directory::create_class(&conn, "7A", None, None).expect("7A");
        let c7b = directory::create_class(&conn, "7B", None, None).expect("7B");
        Fixture {
            admin: Actor::new(Role::Admin, admin.id),
            t1: t1.id,
            t2: t2.id,
            math: math.id,
            bio: bio.id,
            c7a: c7a.id,
            c7b: c7b.id,
            conn,
        }
    }

    fn odd() -> AcademicPeriod {
        AcademicPeriod::new("2025/2026", Semester::Odd).expect("period")
    }

    fn slot(teacher: &str, subject: &str, class: &str, period: AcademicPeriod) -> TeachingSlot {
        TeachingSlot {
            teacher_id: teacher.to_string(),
            subject_id: subject.to_string(),
            class_id: class.to_string(),
            period,
        }
    }

    fn assignment_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM teaching_assignments", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn one_slot_one_teacher() {
        let f = fixture();
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("assign t1");

        let err = assign_teaching(&f.conn, &f.admin, &slot(&f.t2, &f.math, &f.c7a, odd()))
            .expect_err("slot taken");
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");
        let err = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd()))
            .expect_err("exact duplicate");
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");

        assert_eq!(assignment_count(&f.conn), 1);
        assert!(roles::has_role(&f.conn, &f.t1, RoleKind::SubjectTeacher).expect("t1 role"));
        assert!(!roles::has_role(&f.conn, &f.t2, RoleKind::SubjectTeacher).expect("t2 role"));
    }

    #[test]
    fn registry_mutations_are_admin_only() {
        let f = fixture();
        let guru = Actor::new(Role::Teacher, f.t1.clone());
        let err = assign_teaching(&f.conn, &guru, &slot(&f.t1, &f.math, &f.c7a, odd()))
            .expect_err("guru may not assign");
        assert!(matches!(err, CoreError::Forbidden(_)));
        let err = assign_homeroom(&f.conn, &guru, &f.t1, &f.c7a).expect_err("guru may not assign");
        assert!(matches!(err, CoreError::Forbidden(_)));
    }

    #[test]
    fn unknown_references_are_not_found() {
        let f = fixture();
        let err = assign_teaching(&f.conn, &f.admin, &slot("nobody", &f.math, &f.c7a, odd()))
            .expect_err("missing teacher");
        assert!(matches!(err, CoreError::NotFound(_)));
        let err = unassign_teaching(&f.conn, &f.admin, "missing").expect_err("missing id");
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn assign_then_unassign_restores_prior_state() {
        let f = fixture();
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.bio, &f.c7b, odd())).expect("seed");
        let before = roles::all_rows(&f.conn);
        let before_count = assignment_count(&f.conn);

        let a = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("assign");
        assert_ne!(roles::all_rows(&f.conn), before);
        unassign_teaching(&f.conn, &f.admin, &a.id).expect("unassign");

        assert_eq!(roles::all_rows(&f.conn), before);
        assert_eq!(assignment_count(&f.conn), before_count);
    }

    #[test]
    fn reassign_moves_projection_row() {
        let f = fixture();
        let a = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("assign");
        let moved = reassign_teaching(&f.conn, &f.admin, &a.id, &slot(&f.t2, &f.math, &f.c7a, odd()))
            .expect("reassign");
        assert_eq!(moved.previous.teacher_id, f.t1);
        assert_eq!(moved.current.teacher_id, f.t2);
        assert!(!roles::has_role(&f.conn, &f.t1, RoleKind::SubjectTeacher).expect("t1"));
        assert!(roles::has_role(&f.conn, &f.t2, RoleKind::SubjectTeacher).expect("t2"));
    }

    #[test]
    fn reassign_into_occupied_slot_conflicts() {
        let f = fixture();
        let a = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("a");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t2, &f.bio, &f.c7a, odd())).expect("b");
        let err = reassign_teaching(&f.conn, &f.admin, &a.id, &slot(&f.t1, &f.bio, &f.c7a, odd()))
            .expect_err("occupied");
        assert!(matches!(err, CoreError::Conflict(_)));
        // Reassigning onto its own slot is not a conflict with itself.
        reassign_teaching(&f.conn, &f.admin, &a.id, &slot(&f.t1, &f.math, &f.c7a, odd()))
            .expect("same slot");
    }

    #[test]
    fn reassign_keeps_row_backed_by_another_period() {
        let f = fixture();
        let even = AcademicPeriod::new("2025/2026", Semester::Even).expect("even");
        let a = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("odd");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, even)).expect("even");

        reassign_teaching(&f.conn, &f.admin, &a.id, &slot(&f.t2, &f.math, &f.c7a, odd()))
            .expect("reassign odd");
        let t1_rows = roles::roles_of(&f.conn, &f.t1).expect("rows");
        assert_eq!(t1_rows.len(), 1);
        assert_eq!(t1_rows[0].subject_id.as_deref(), Some(f.math.as_str()));
    }

    #[test]
    fn homeroom_is_one_class_per_teacher() {
        let f = fixture();
        assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7a).expect("7A");

        let err = assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7b).expect_err("second class");
        assert!(matches!(err, CoreError::Conflict(_)));
        let err = assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7a).expect_err("same class again");
        assert!(matches!(err, CoreError::Conflict(_)));

        let cleared = unassign_homeroom(&f.conn, &f.admin, &f.c7a).expect("unassign");
        assert_eq!(cleared.previous_teacher_id.as_deref(), Some(f.t1.as_str()));
        assert!(!roles::has_role(&f.conn, &f.t1, RoleKind::HomeroomTeacher).expect("role"));

        let err = unassign_homeroom(&f.conn, &f.admin, &f.c7a).expect_err("nothing to clear");
        assert!(matches!(err, CoreError::InvalidState(_)));
        let err = unassign_homeroom(&f.conn, &f.admin, "missing").expect_err("no class");
        assert!(matches!(err, CoreError::NotFound(_)));

        assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7b).expect("7B after unassign");
    }

    #[test]
    fn displaced_homeroom_teacher_loses_row() {
        let f = fixture();
        assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7a).expect("t1");
        let change = assign_homeroom(&f.conn, &f.admin, &f.t2, &f.c7a).expect("t2 takes over");
        assert_eq!(change.previous_teacher_id.as_deref(), Some(f.t1.as_str()));
        assert!(!roles::has_role(&f.conn, &f.t1, RoleKind::HomeroomTeacher).expect("t1"));
        assert!(roles::has_role(&f.conn, &f.t2, RoleKind::HomeroomTeacher).expect("t2"));
        assert_eq!(
            directory::homeroom_teacher_of(&f.conn, &f.c7a).expect("lookup"),
            Some(Some(f.t2.clone()))
        );
    }

    #[test]
    fn storage_rejects_a_second_holder_that_skipped_the_precheck() {
        let f = fixture();
        let held = assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("t1");

        // Another writer for the same slot, as if it had read before t1 committed.
        let rival = TeachingAssignment {
            id: Uuid::new_v4().to_string(),
            teacher_id: f.t2.clone(),
            ..held.clone()
        };
        let err = insert_assignment(&f.conn, &rival).expect_err("slot index");
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");

        let twin = TeachingAssignment {
            id: Uuid::new_v4().to_string(),
            ..held
        };
        let err = insert_assignment(&f.conn, &twin).expect_err("teacher slot index");
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");
        assert_eq!(assignment_count(&f.conn), 1);
    }

    #[test]
    fn storage_rejects_a_second_homeroom_class_for_one_teacher() {
        let f = fixture();
        assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7a).expect("7A");

        let err = set_homeroom(&f.conn, &f.t1, &f.c7b).expect_err("homeroom index");
        assert!(matches!(err, CoreError::Conflict(_)), "{err:?}");
        assert_eq!(
            directory::homeroom_teacher_of(&f.conn, &f.c7b).expect("lookup"),
            Some(None)
        );
    }

    #[test]
    fn deleting_a_class_takes_its_projection_rows_along() {
        let f = fixture();
        let even = AcademicPeriod::new("2025/2026", Semester::Even).expect("even");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("odd");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, even)).expect("even");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.bio, &f.c7b, odd())).expect("7B");
        assign_homeroom(&f.conn, &f.admin, &f.t2, &f.c7a).expect("homeroom");
        let s = directory::create_student(&f.conn, "S", "0001").expect("student");
        directory::enroll(&f.conn, &s.id, &f.c7a).expect("enroll");

        let removal = delete_class(&f.conn, &f.admin, &f.c7a).expect("delete");
        assert_eq!(removal.assignments.len(), 2);
        assert_eq!(
            removal.homeroom.as_ref().and_then(|h| h.previous_teacher_id.as_deref()),
            Some(f.t2.as_str())
        );
        assert_eq!(removal.unenrolled, vec![s.id.clone()]);
        assert_eq!(removal.affected_teachers(), vec![f.t1.as_str(), f.t2.as_str()]);

        // Only the 7B row survives; t2 lost the homeroom row entirely.
        let t1_rows = roles::roles_of(&f.conn, &f.t1).expect("t1");
        assert_eq!(t1_rows.len(), 1);
        assert_eq!(t1_rows[0].class_id.as_deref(), Some(f.c7b.as_str()));
        assert!(roles::roles_of(&f.conn, &f.t2).expect("t2").is_empty());
        assert_eq!(assignment_count(&f.conn), 1);
        assert_eq!(directory::get_student(&f.conn, &s.id).expect("student").class_id, None);
        assert!(matches!(
            delete_class(&f.conn, &f.admin, &f.c7a),
            Err(CoreError::NotFound(_))
        ));
    }

    #[test]
    fn deleting_a_teacher_frees_their_slots_and_class() {
        let f = fixture();
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("math");
        assign_homeroom(&f.conn, &f.admin, &f.t1, &f.c7b).expect("homeroom");

        let guru = Actor::new(Role::Teacher, f.t2.clone());
        assert!(matches!(
            delete_teacher(&f.conn, &guru, &f.t1),
            Err(CoreError::Forbidden(_))
        ));

        let removal = delete_teacher(&f.conn, &f.admin, &f.t1).expect("delete");
        assert_eq!(removal.assignments.len(), 1);
        assert_eq!(
            removal.homeroom.as_ref().map(|h| h.class_id.as_str()),
            Some(f.c7b.as_str())
        );
        assert!(roles::all_rows(&f.conn).is_empty());
        assert_eq!(
            directory::homeroom_teacher_of(&f.conn, &f.c7b).expect("class"),
            Some(None)
        );
        // The freed slot takes a new holder.
        assign_teaching(&f.conn, &f.admin, &slot(&f.t2, &f.math, &f.c7a, odd())).expect("t2 takes math");
    }

    #[test]
    fn deleting_a_subject_keeps_other_rows_of_the_teacher() {
        let f = fixture();
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("math");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.bio, &f.c7a, odd())).expect("bio");

        let removal = delete_subject(&f.conn, &f.admin, &f.bio).expect("delete");
        assert_eq!(removal.affected_teachers(), vec![f.t1.as_str()]);
        let rows = roles::roles_of(&f.conn, &f.t1).expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject_id.as_deref(), Some(f.math.as_str()));
        assert!(!directory::subject_exists(&f.conn, &f.bio).expect("exists"));
    }

    #[test]
    fn lookup_falls_back_only_when_strict_is_empty() {
        let f = fixture();
        let old = AcademicPeriod::new("2024/2025", Semester::Even).expect("old");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.bio, &f.c7a, old)).expect("old bio");

        let lookup = lookup_teaching_subjects(&f.conn, &f.t1, &f.c7a, Some(&odd())).expect("lookup");
        assert!(lookup.fallback);
        assert!(lookup.subjects.contains(&f.bio));
        assert!(teaches_subject(&f.conn, &f.t1, &f.c7a, &f.bio, &odd()).expect("fallback grant"));

        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("math");
        let lookup = lookup_teaching_subjects(&f.conn, &f.t1, &f.c7a, Some(&odd())).expect("lookup");
        assert!(!lookup.fallback);
        assert_eq!(lookup.subjects.len(), 1);
        assert!(!teaches_subject(&f.conn, &f.t1, &f.c7a, &f.bio, &odd()).expect("strict wins"));
    }

    #[test]
    fn teachers_list_only_their_own_assignments() {
        let f = fixture();
        assign_teaching(&f.conn, &f.admin, &slot(&f.t1, &f.math, &f.c7a, odd())).expect("t1");
        assign_teaching(&f.conn, &f.admin, &slot(&f.t2, &f.bio, &f.c7a, odd())).expect("t2");

        let guru = Actor::new(Role::Teacher, f.t1.clone());
        let own = list_assignments(&f.conn, &guru, &AssignmentFilter::default()).expect("own");
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].teacher_id, f.t1);

        let other = AssignmentFilter {
            teacher_id: Some(f.t2.clone()),
            ..AssignmentFilter::default()
        };
        assert!(matches!(
            list_assignments(&f.conn, &guru, &other),
            Err(CoreError::Forbidden(_))
        ));
        assert_eq!(
            list_assignments(&f.conn, &f.admin, &AssignmentFilter::default())
                .expect("all")
                .len(),
            2
        );
    }
}
