use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::actor::Actor;
use crate::ipc::helpers::{announce, parse_params, with_actor, Announcement, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, AttendanceKind, NewRecord, RecordFilter, RecordPatch, Status};
use crate::notify;
use crate::period;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateParams {
    student_id: String,
    class_id: String,
    subject_id: Option<String>,
    kind: AttendanceKind,
    date: String,
    status: Status,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateParams {
    record_id: String,
    status: Option<Status>,
    note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIdParams {
    record_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterParams {
    class_id: String,
    subject_id: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterParams {
    class_id: Option<String>,
    subject_id: Option<String>,
    student_id: Option<String>,
    date: Option<String>,
    kind: Option<AttendanceKind>,
}

impl FilterParams {
    fn into_filter(self) -> Result<RecordFilter, HandlerErr> {
        Ok(RecordFilter {
            date: self.date.as_deref().map(period::parse_date).transpose()?,
            class_id: self.class_id,
            subject_id: self.subject_id,
            student_id: self.student_id,
            kind: self.kind,
        })
    }
}

fn attendance_create(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: CreateParams = parse_params(params)?;
    let new = NewRecord {
        date: period::parse_date(&p.date)?,
        student_id: p.student_id,
        class_id: p.class_id,
        subject_id: p.subject_id,
        kind: p.kind,
        status: p.status,
        note: p.note,
    };
    let record = ledger::create_record(conn, state.clock.as_ref(), actor, &new)?;
    Ok(json!({ "record": record }))
}

fn attendance_update(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: UpdateParams = parse_params(params)?;
    let patch = RecordPatch {
        status: p.status,
        note: p.note,
    };
    let record = ledger::update_record(conn, state.clock.as_ref(), actor, &p.record_id, &patch)?;
    Ok(json!({ "record": record }))
}

fn attendance_delete(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: RecordIdParams = parse_params(params)?;
    let record = ledger::delete_record(conn, actor, &p.record_id)?;
    Ok(json!({ "deleted": record.id }))
}

fn attendance_get(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: RecordIdParams = parse_params(params)?;
    let record = ledger::get_record(conn, state.clock.as_ref(), actor, &p.record_id)?;
    Ok(json!({ "record": record }))
}

fn attendance_roster(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: RosterParams = parse_params(params)?;
    let date = match p.date.as_deref() {
        Some(raw) => period::parse_date(raw)?,
        None => state.clock.today(),
    };
    let lines = ledger::roster_sheet(
        conn,
        state.clock.as_ref(),
        actor,
        &p.class_id,
        p.subject_id.as_deref(),
        date,
    )?;
    Ok(json!({
        "classId": p.class_id,
        "subjectId": p.subject_id,
        "date": date.format("%Y-%m-%d").to_string(),
        "students": lines,
    }))
}

fn attendance_query(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: FilterParams = parse_params(params)?;
    let filter = p.into_filter()?;
    let records = ledger::query_records(conn, state.clock.as_ref(), actor, &filter)?;
    Ok(json!({ "records": records }))
}

fn attendance_export(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: FilterParams = parse_params(params)?;
    let filter = p.into_filter()?;
    let rows = ledger::export_records(conn, state.clock.as_ref(), actor, &filter)?;

    announce(
        state,
        conn,
        Announcement {
            event_type: notify::ATTENDANCE_EXPORTED,
            title: "Attendance exported".to_string(),
            body: format!("{} attendance rows exported by {}", rows.len(), actor.id),
            payload: json!({
                "exportedBy": &actor.id,
                "rows": rows.len(),
                "classId": &filter.class_id,
                "subjectId": &filter.subject_id,
                "date": filter.date.map(|d| d.format("%Y-%m-%d").to_string()),
            }),
            teachers: vec![actor.id.as_str()],
            class_id: filter.class_id.as_deref(),
        },
    );
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state = &*state;
    let params = &req.params;
    match req.method.as_str() {
        "attendance.create" => Some(with_actor(state, req, |c, a| {
            attendance_create(state, c, a, params)
        })),
        "attendance.update" => Some(with_actor(state, req, |c, a| {
            attendance_update(state, c, a, params)
        })),
        "attendance.delete" => Some(with_actor(state, req, |c, a| attendance_delete(c, a, params))),
        "attendance.get" => Some(with_actor(state, req, |c, a| {
            attendance_get(state, c, a, params)
        })),
        "attendance.roster" => Some(with_actor(state, req, |c, a| {
            attendance_roster(state, c, a, params)
        })),
        "attendance.query" => Some(with_actor(state, req, |c, a| {
            attendance_query(state, c, a, params)
        })),
        "attendance.export" => Some(with_actor(state, req, |c, a| {
            attendance_export(state, c, a, params)
        })),
        _ => None,
    }
}
