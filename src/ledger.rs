use std::collections::BTreeSet;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::actor::{Actor, Role};
use crate::db;
use crate::directory;
use crate::error::{CoreError, CoreResult};
use crate::period::{AcademicPeriod, Clock};
use crate::policy::{self, Facts, Operation};
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceKind {
    #[serde(alias = "kelas")]
    Class,
    #[serde(alias = "mapel")]
    Subject,
}

impl AttendanceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceKind::Class => "class",
            AttendanceKind::Subject => "subject",
        }
    }

    fn from_db(raw: &str) -> AttendanceKind {
        match raw {
            "subject" => AttendanceKind::Subject,
            _ => AttendanceKind::Class,
        }
    }

    fn create_operation(self) -> Operation {
        match self {
            AttendanceKind::Class => Operation::CreateClassRecord,
            AttendanceKind::Subject => Operation::CreateSubjectRecord,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[serde(alias = "masuk")]
    Present,
    #[serde(alias = "izin")]
    Excused,
    #[serde(alias = "sakit")]
    Sick,
    #[serde(alias = "terlambat")]
    Late,
    #[serde(alias = "alpa")]
    Absent,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Present => "present",
            Status::Excused => "excused",
            Status::Sick => "sick",
            Status::Late => "late",
            Status::Absent => "absent",
        }
    }

    fn from_db(raw: &str) -> rusqlite::Result<Status> {
        Ok(match raw {
            "present" => Status::Present,
            "excused" => Status::Excused,
            "sick" => Status::Sick,
            "late" => Status::Late,
            "absent" => Status::Absent,
            other => {
                return Err(rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown attendance status {other:?}").into(),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub teacher_id: String,
    pub kind: AttendanceKind,
    pub date: String,
    pub status: Status,
    pub note: Option<String>,
    pub period: AcademicPeriod,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub student_id: String,
    pub class_id: String,
    pub subject_id: Option<String>,
    pub kind: AttendanceKind,
    pub date: NaiveDate,
    pub status: Status,
    pub note: Option<String>,
}

/// Fields left `None` are not touched. An empty note clears it.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<Status>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub class_id: Option<String>,
    pub subject_id: Option<String>,
    pub student_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub kind: Option<AttendanceKind>,
}

/// A record with the display names an external formatter needs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRow {
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub student_name: String,
    pub subject_name: Option<String>,
}

/// One roster line of an attendance sheet, with the mark already taken for
/// the sheet's date and lesson if there is one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetLine {
    pub student_id: String,
    pub student_name: String,
    pub nisn: String,
    pub record_id: Option<String>,
    pub status: Option<Status>,
    pub note: Option<String>,
}

/// How far a query may reach once the actor's role has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reach {
    Everything,
    Class(String),
    Pairs(BTreeSet<(String, String)>),
}

const RECORD_COLS: &str = "r.id, r.student_id, r.class_id, r.subject_id, r.teacher_id, r.kind, r.date,
     r.status, r.note, r.academic_year, r.semester, r.created_at, r.updated_at";

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let kind: String = r.get(5)?;
    let status: String = r.get(7)?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        subject_id: r.get(3)?,
        teacher_id: r.get(4)?,
        kind: AttendanceKind::from_db(&kind),
        date: r.get(6)?,
        status: Status::from_db(&status)?,
        note: r.get(8)?,
        period: db::period_at(r, 9)?,
        created_at: r.get(11)?,
        updated_at: r.get(12)?,
    })
}

fn clean_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn load(conn: &Connection, id: &str) -> CoreResult<AttendanceRecord> {
    conn.query_row(
        &format!("SELECT {RECORD_COLS} FROM attendance_records r WHERE r.id = ?"),
        [id],
        record_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::NotFound(format!("attendance record {id} not found")))
}

fn live_homeroom(conn: &Connection, class_id: &str) -> CoreResult<Option<String>> {
    Ok(directory::homeroom_teacher_of(conn, class_id)?.flatten())
}

/// Facts for update and delete: the recorder and the class's homeroom
/// teacher as it stands now, not as it stood when the record was written.
fn mutation_facts(conn: &Connection, record: &AttendanceRecord) -> CoreResult<Facts> {
    Ok(Facts {
        record_teacher_id: Some(record.teacher_id.clone()),
        class_homeroom_teacher_id: live_homeroom(conn, &record.class_id)?,
        ..Facts::default()
    })
}

/// A duplicate that got past the lookup in `create_record` fails on
/// `idx_attendance_records_slot` and surfaces as a conflict.
fn insert_record(conn: &Connection, record: &AttendanceRecord) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO attendance_records(id, student_id, class_id, subject_id, teacher_id, kind, date,
           status, note, academic_year, semester, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.student_id,
            &record.class_id,
            &record.subject_id,
            &record.teacher_id,
            record.kind.as_str(),
            &record.date,
            record.status.as_str(),
            &record.note,
            &record.period.year,
            record.period.semester.as_str(),
            &record.created_at,
            &record.updated_at,
        ),
    )?;
    Ok(())
}

pub fn create_record(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    new: &NewRecord,
) -> CoreResult<AttendanceRecord> {
    let op = new.kind.create_operation();
    policy::into_result(actor, op, policy::permits(actor, op))?;

    let tx = db::immediate_tx(conn)?;
    if !directory::student_exists(&tx, &new.student_id)? {
        return Err(CoreError::BadRequest(format!(
            "student {} does not exist",
            new.student_id
        )));
    }
    if !directory::is_enrolled(&tx, &new.student_id, &new.class_id)? {
        return Err(CoreError::BadRequest(format!(
            "student {} is not enrolled in class {}",
            new.student_id, new.class_id
        )));
    }

    let period = clock.current_period();
    let facts = match (new.kind, new.subject_id.as_deref()) {
        (AttendanceKind::Subject, None) => {
            return Err(CoreError::BadRequest(
                "subjectId is required for subject attendance".to_string(),
            ))
        }
        (AttendanceKind::Subject, Some(subject_id)) => Facts {
            teaches_subject_in_class: registry::teaches_subject(
                &tx,
                &actor.id,
                &new.class_id,
                subject_id,
                &period,
            )?,
            ..Facts::default()
        },
        (AttendanceKind::Class, Some(_)) => {
            return Err(CoreError::BadRequest(
                "class attendance must not carry a subjectId".to_string(),
            ))
        }
        (AttendanceKind::Class, None) => Facts {
            class_homeroom_teacher_id: live_homeroom(&tx, &new.class_id)?,
            ..Facts::default()
        },
    };
    policy::enforce(actor, op, &facts)?;

    let date = format_date(new.date);
    let taken: Option<String> = tx
        .query_row(
            "SELECT id FROM attendance_records
             WHERE student_id = ? AND date = ? AND kind = ? AND class_id = ?
               AND IFNULL(subject_id, '') = IFNULL(?, '')",
            (
                &new.student_id,
                &date,
                new.kind.as_str(),
                &new.class_id,
                new.subject_id.as_deref(),
            ),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = taken {
        return Err(CoreError::Conflict(format!(
            "attendance already recorded for student {} on {date} (record {existing})",
            new.student_id
        )));
    }

    let now = clock.now().to_rfc3339();
    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        student_id: new.student_id.clone(),
        class_id: new.class_id.clone(),
        subject_id: new.subject_id.clone(),
        teacher_id: actor.id.clone(),
        kind: new.kind,
        date,
        status: new.status,
        note: clean_note(new.note.as_deref()),
        period,
        created_at: now.clone(),
        updated_at: now,
    };
    insert_record(&tx, &record)?;
    tx.commit()?;

    info!(
        record = %record.id,
        kind = record.kind.as_str(),
        student = %record.student_id,
        class = %record.class_id,
        teacher = %record.teacher_id,
        date = %record.date,
        "attendance recorded"
    );
    Ok(record)
}

pub fn update_record(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    id: &str,
    patch: &RecordPatch,
) -> CoreResult<AttendanceRecord> {
    let tx = db::immediate_tx(conn)?;
    let mut record = load(&tx, id)?;
    policy::enforce(actor, Operation::UpdateRecord, &mutation_facts(&tx, &record)?)?;

    let mut changed = false;
    if let Some(status) = patch.status {
        changed |= status != record.status;
        record.status = status;
    }
    if let Some(note) = patch.note.as_deref() {
        let note = clean_note(Some(note));
        changed |= note != record.note;
        record.note = note;
    }
    if !changed {
        return Err(CoreError::BadRequest(
            "update does not change status or note".to_string(),
        ));
    }

    record.updated_at = clock.now().to_rfc3339();
    tx.execute(
        "UPDATE attendance_records SET status = ?, note = ?, updated_at = ? WHERE id = ?",
        (record.status.as_str(), &record.note, &record.updated_at, &record.id),
    )?;
    tx.commit()?;

    info!(record = %record.id, actor = %actor.id, status = record.status.as_str(), "attendance updated");
    Ok(record)
}

pub fn delete_record(conn: &Connection, actor: &Actor, id: &str) -> CoreResult<AttendanceRecord> {
    let tx = db::immediate_tx(conn)?;
    let record = load(&tx, id)?;
    policy::enforce(actor, Operation::DeleteRecord, &mutation_facts(&tx, &record)?)?;
    tx.execute("DELETE FROM attendance_records WHERE id = ?", [id])?;
    tx.commit()?;

    info!(record = %record.id, actor = %actor.id, "attendance deleted");
    Ok(record)
}

pub fn get_record(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    id: &str,
) -> CoreResult<AttendanceRecord> {
    let record = load(conn, id)?;
    let mut facts = mutation_facts(conn, &record)?;
    if actor.role == Role::Teacher {
        // Same scope as a query: current-period pairs only.
        let pairs = registry::teaching_pairs(conn, &actor.id, &clock.current_period())?;
        facts.teaches_subject_in_class = match record.subject_id.as_deref() {
            Some(subject_id) => {
                pairs.contains(&(record.class_id.clone(), subject_id.to_string()))
            }
            None => pairs.iter().any(|(c, _)| *c == record.class_id),
        };
    }
    policy::enforce(actor, Operation::ReadRecord, &facts)?;
    Ok(record)
}

/// Applies the actor's role to a filter: admins reach everything, homeroom
/// teachers their own class, subject teachers their current teaching pairs.
pub fn reach(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    op: Operation,
    filter: &RecordFilter,
) -> CoreResult<Reach> {
    policy::into_result(actor, op, policy::permits(actor, op))?;
    match actor.role {
        Role::Admin => Ok(Reach::Everything),
        Role::HomeroomTeacher => {
            let Some(own) = directory::homeroom_class_of(conn, &actor.id)? else {
                return Err(CoreError::Forbidden(format!(
                    "teacher {} is not homeroom teacher of any class",
                    actor.id
                )));
            };
            if let Some(asked) = filter.class_id.as_deref() {
                if asked != own {
                    return Err(CoreError::Forbidden(format!(
                        "class {asked} is not the actor's homeroom class"
                    )));
                }
            }
            Ok(Reach::Class(own))
        }
        Role::Teacher => {
            let pairs = registry::teaching_pairs(conn, &actor.id, &clock.current_period())?;
            if pairs.is_empty() {
                return Err(CoreError::Forbidden(format!(
                    "teacher {} has no teaching assignments",
                    actor.id
                )));
            }
            let covered = pairs.iter().any(|(c, s)| {
                filter.class_id.as_deref().map_or(true, |fc| fc == c)
                    && filter.subject_id.as_deref().map_or(true, |fs| fs == s)
            });
            if !covered {
                return Err(CoreError::Forbidden(
                    "filter names a class or subject the actor does not teach".to_string(),
                ));
            }
            Ok(Reach::Pairs(pairs))
        }
    }
}

/// The class roster for one date: subject attendance when `subject_id` is
/// given, class attendance otherwise. Subject teachers see only their
/// current-period lessons.
pub fn roster_sheet(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    class_id: &str,
    subject_id: Option<&str>,
    date: NaiveDate,
) -> CoreResult<Vec<SheetLine>> {
    policy::into_result(actor, Operation::ViewRoster, policy::permits(actor, Operation::ViewRoster))?;
    directory::require_class(conn, class_id)?;
    if let Some(subject_id) = subject_id {
        directory::require_subject(conn, subject_id)?;
    }

    let mut facts = Facts {
        class_homeroom_teacher_id: live_homeroom(conn, class_id)?,
        ..Facts::default()
    };
    if let (Role::Teacher, Some(subject_id)) = (actor.role, subject_id) {
        let pairs = registry::teaching_pairs(conn, &actor.id, &clock.current_period())?;
        facts.teaches_subject_in_class =
            pairs.contains(&(class_id.to_string(), subject_id.to_string()));
    }
    policy::enforce(actor, Operation::ViewRoster, &facts)?;

    let kind = match subject_id {
        Some(_) => AttendanceKind::Subject,
        None => AttendanceKind::Class,
    };
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.nisn, r.id, r.status, r.note
         FROM class_members m
         JOIN students s ON s.id = m.student_id
         LEFT JOIN attendance_records r
           ON r.student_id = s.id AND r.class_id = m.class_id
          AND r.date = ?2 AND r.kind = ?3 AND IFNULL(r.subject_id, '') = IFNULL(?4, '')
         WHERE m.class_id = ?1
         ORDER BY s.name, s.id",
    )?;
    let lines = stmt
        .query_map(
            (class_id, format_date(date), kind.as_str(), subject_id),
            |r| {
                let status: Option<String> = r.get(4)?;
                Ok(SheetLine {
                    student_id: r.get(0)?,
                    student_name: r.get(1)?,
                    nisn: r.get(2)?,
                    record_id: r.get(3)?,
                    status: status.as_deref().map(Status::from_db).transpose()?,
                    note: r.get(5)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines)
}

fn fetch(conn: &Connection, filter: &RecordFilter, reach: &Reach) -> CoreResult<Vec<ExportRow>> {
    let class_id = match reach {
        Reach::Class(own) => Some(own.as_str()),
        _ => filter.class_id.as_deref(),
    };
    let date = filter.date.map(format_date);
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLS}, s.name, sub.name
         FROM attendance_records r
         JOIN students s ON s.id = r.student_id
         LEFT JOIN subjects sub ON sub.id = r.subject_id
         WHERE (?1 IS NULL OR r.class_id = ?1)
           AND (?2 IS NULL OR r.subject_id = ?2)
           AND (?3 IS NULL OR r.student_id = ?3)
           AND (?4 IS NULL OR r.date = ?4)
           AND (?5 IS NULL OR r.kind = ?5)
         ORDER BY r.class_id, IFNULL(r.subject_id, ''), r.student_id, r.date, r.id"
    ))?;
    let rows = stmt
        .query_map(
            (
                class_id,
                filter.subject_id.as_deref(),
                filter.student_id.as_deref(),
                date.as_deref(),
                filter.kind.map(AttendanceKind::as_str),
            ),
            |r| {
                Ok(ExportRow {
                    record: record_from_row(r)?,
                    student_name: r.get(13)?,
                    subject_name: r.get(14)?,
                })
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(match reach {
        Reach::Pairs(pairs) => rows
            .into_iter()
            .filter(|row| match row.record.subject_id.as_ref() {
                Some(s) => pairs.contains(&(row.record.class_id.clone(), s.clone())),
                None => false,
            })
            .collect(),
        _ => rows,
    })
}

pub fn query_records(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    filter: &RecordFilter,
) -> CoreResult<Vec<AttendanceRecord>> {
    let reach = reach(conn, clock, actor, Operation::QueryRecords, filter)?;
    Ok(fetch(conn, filter, &reach)?
        .into_iter()
        .map(|row| row.record)
        .collect())
}

pub fn export_records(
    conn: &Connection,
    clock: &dyn Clock,
    actor: &Actor,
    filter: &RecordFilter,
) -> CoreResult<Vec<ExportRow>> {
    let reach = reach(conn, clock, actor, Operation::ExportRecords, filter)?;
    let rows = fetch(conn, filter, &reach)?;
    info!(actor = %actor.id, rows = rows.len(), "attendance exported");
    Ok(rows)
}
