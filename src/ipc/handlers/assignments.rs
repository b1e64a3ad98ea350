use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::actor::Actor;
use crate::ipc::helpers::{
    announce, explicit_period, parse_params, period_or_current, with_actor, Announcement,
    HandlerErr, PeriodParam,
};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::policy::{self, Facts, Operation};
use crate::registry::{self, AssignmentFilter, TeachingSlot};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SlotParams {
    teacher_id: String,
    subject_id: String,
    class_id: String,
    period: Option<PeriodParam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReassignParams {
    assignment_id: String,
    #[serde(flatten)]
    slot: SlotParams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentIdParams {
    assignment_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    teacher_id: Option<String>,
    class_id: Option<String>,
    period: Option<PeriodParam>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupParams {
    teacher_id: String,
    class_id: String,
    period: Option<PeriodParam>,
}

fn to_slot(state: &AppState, p: SlotParams) -> Result<TeachingSlot, HandlerErr> {
    Ok(TeachingSlot {
        period: period_or_current(state, p.period)?,
        teacher_id: p.teacher_id,
        subject_id: p.subject_id,
        class_id: p.class_id,
    })
}

fn assignments_assign(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: SlotParams = parse_params(params)?;
    let slot = to_slot(state, p)?;
    let assignment = registry::assign_teaching(conn, actor, &slot)?;

    announce(
        state,
        conn,
        Announcement {
            event_type: notify::TEACHING_ASSIGNED,
            title: "New teaching assignment".to_string(),
            body: format!(
                "Subject {} in class {} for {}",
                assignment.subject_id, assignment.class_id, assignment.period
            ),
            payload: json!({ "assignment": &assignment }),
            teachers: vec![assignment.teacher_id.as_str()],
            class_id: Some(assignment.class_id.as_str()),
        },
    );
    Ok(json!({ "assignment": assignment }))
}

fn assignments_reassign(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ReassignParams = parse_params(params)?;
    let slot = to_slot(state, p.slot)?;
    let moved = registry::reassign_teaching(conn, actor, &p.assignment_id, &slot)?;

    announce(
        state,
        conn,
        Announcement {
            event_type: notify::TEACHING_REASSIGNED,
            title: "Teaching assignment changed".to_string(),
            body: format!(
                "Subject {} in class {} for {} moved from teacher {} to teacher {}",
                moved.current.subject_id,
                moved.current.class_id,
                moved.current.period,
                moved.previous.teacher_id,
                moved.current.teacher_id
            ),
            payload: json!({ "previous": &moved.previous, "current": &moved.current }),
            teachers: vec![moved.previous.teacher_id.as_str(), moved.current.teacher_id.as_str()],
            class_id: Some(moved.current.class_id.as_str()),
        },
    );
    Ok(json!({ "assignment": moved.current, "previous": moved.previous }))
}

fn assignments_unassign(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: AssignmentIdParams = parse_params(params)?;
    let removed = registry::unassign_teaching(conn, actor, &p.assignment_id)?;

    announce(
        state,
        conn,
        Announcement {
            event_type: notify::TEACHING_UNASSIGNED,
            title: "Teaching assignment removed".to_string(),
            body: format!(
                "Subject {} in class {} for {}",
                removed.subject_id, removed.class_id, removed.period
            ),
            payload: json!({ "assignment": &removed }),
            teachers: vec![removed.teacher_id.as_str()],
            class_id: Some(removed.class_id.as_str()),
        },
    );
    Ok(json!({ "removed": removed }))
}

fn assignments_list(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let filter = AssignmentFilter {
        teacher_id: p.teacher_id,
        class_id: p.class_id,
        period: explicit_period(p.period)?,
    };
    let rows = registry::list_assignments(conn, actor, &filter)?;
    Ok(json!({ "assignments": rows }))
}

fn assignments_lookup_subjects(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: LookupParams = parse_params(params)?;
    policy::enforce(
        actor,
        Operation::ListAssignments,
        &Facts {
            target_teacher_id: Some(p.teacher_id.clone()),
            ..Facts::default()
        },
    )?;
    let period = explicit_period(p.period)?;
    let lookup = registry::lookup_teaching_subjects(conn, &p.teacher_id, &p.class_id, period.as_ref())?;
    Ok(json!({
        "subjectIds": lookup.subjects,
        "fallback": lookup.fallback,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state = &*state;
    let params = &req.params;
    match req.method.as_str() {
        "assignments.assign" => Some(with_actor(state, req, |c, a| {
            assignments_assign(state, c, a, params)
        })),
        "assignments.reassign" => Some(with_actor(state, req, |c, a| {
            assignments_reassign(state, c, a, params)
        })),
        "assignments.unassign" => Some(with_actor(state, req, |c, a| {
            assignments_unassign(state, c, a, params)
        })),
        "assignments.list" => Some(with_actor(state, req, |c, a| assignments_list(c, a, params))),
        "assignments.lookupSubjects" => Some(with_actor(state, req, |c, a| {
            assignments_lookup_subjects(c, a, params)
        })),
        _ => None,
    }
}
