use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::actor::{Actor, Role};
use crate::directory;
use crate::error::CoreError;
use crate::ipc::error::{core_err, err, ok};
use crate::ipc::helpers::parse_params;
use crate::ipc::types::{AppState, Request};
use crate::roles::{self, RoleKind};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveParams {
    user_id: String,
    channel: Role,
}

fn resolve(conn: &Connection, user_id: &str, channel: Role) -> Result<serde_json::Value, CoreError> {
    if channel == Role::Admin {
        if !directory::admin_exists(conn, user_id)? {
            return Err(CoreError::NotFound(format!("admin {user_id} not found")));
        }
        return Ok(json!({ "actor": Actor::new(Role::Admin, user_id), "roles": [] }));
    }

    directory::require_teacher(conn, user_id)?;
    let is_homeroom = roles::has_role(conn, user_id, RoleKind::HomeroomTeacher)?;
    match (channel, is_homeroom) {
        (Role::Teacher, true) => {
            return Err(CoreError::Forbidden(
                "homeroom teachers sign in through the homeroom_teacher channel".to_string(),
            ))
        }
        (Role::HomeroomTeacher, false) => {
            return Err(CoreError::Forbidden(format!(
                "teacher {user_id} is not a homeroom teacher"
            )))
        }
        _ => {}
    }

    Ok(json!({
        "actor": Actor::new(channel, user_id),
        "roles": roles::roles_of(conn, user_id)?,
        "homeroomClassId": directory::homeroom_class_of(conn, user_id)?,
    }))
}

fn handle_session_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let p: ResolveParams = match parse_params(&req.params) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    match resolve(conn, &p.user_id, p.channel) {
        Ok(result) => {
            info!(user = %p.user_id, channel = %p.channel, "session resolved");
            ok(&req.id, result)
        }
        Err(e) => {
            debug!(user = %p.user_id, channel = %p.channel, error = %e, "session refused");
            core_err(&req.id, &e)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.resolve" => Some(handle_session_resolve(state, req)),
        _ => None,
    }
}
