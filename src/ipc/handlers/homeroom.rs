use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::actor::Actor;
use crate::ipc::helpers::{announce, parse_params, with_actor, Announcement, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;
use crate::registry;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignParams {
    teacher_id: String,
    class_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassParams {
    class_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolesParams {
    teacher_id: Option<String>,
}

fn homeroom_assign(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: AssignParams = parse_params(params)?;
    let change = registry::assign_homeroom(conn, actor, &p.teacher_id, &p.class_id)?;

    // The displaced teacher is told as well; the class field already names the new one.
    let mut teachers = vec![p.teacher_id.as_str()];
    if let Some(prev) = change.previous_teacher_id.as_deref() {
        teachers.push(prev);
    }
    announce(
        state,
        conn,
        Announcement {
            event_type: notify::HOMEROOM_ASSIGNED,
            title: "Homeroom assignment".to_string(),
            body: format!("Teacher {} is now homeroom teacher of class {}", p.teacher_id, p.class_id),
            payload: json!({ "homeroom": &change }),
            teachers,
            class_id: Some(p.class_id.as_str()),
        },
    );
    Ok(json!({ "homeroom": change }))
}

fn homeroom_unassign(
    state: &AppState,
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ClassParams = parse_params(params)?;
    let change = registry::unassign_homeroom(conn, actor, &p.class_id)?;

    announce(
        state,
        conn,
        Announcement {
            event_type: notify::HOMEROOM_UNASSIGNED,
            title: "Homeroom assignment removed".to_string(),
            body: format!("Class {} no longer has a homeroom teacher", p.class_id),
            payload: json!({ "homeroom": &change }),
            teachers: change.previous_teacher_id.as_deref().into_iter().collect(),
            class_id: Some(p.class_id.as_str()),
        },
    );
    Ok(json!({ "homeroom": change }))
}

fn roles_get(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: RolesParams = parse_params(params)?;
    let teacher_id = p.teacher_id.unwrap_or_else(|| actor.id.clone());
    let rows = registry::roles_for(conn, actor, &teacher_id)?;
    Ok(json!({ "teacherId": teacher_id, "roles": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state = &*state;
    let params = &req.params;
    match req.method.as_str() {
        "homeroom.assign" => Some(with_actor(state, req, |c, a| {
            homeroom_assign(state, c, a, params)
        })),
        "homeroom.unassign" => Some(with_actor(state, req, |c, a| {
            homeroom_unassign(state, c, a, params)
        })),
        "homeroom.list" => Some(with_actor(state, req, |c, a| {
            Ok(json!({ "homerooms": registry::list_homerooms(c, a)? }))
        })),
        "roles.get" => Some(with_actor(state, req, |c, a| roles_get(c, a, params))),
        _ => None,
    }
}
