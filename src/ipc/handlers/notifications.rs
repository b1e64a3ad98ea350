use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

use crate::actor::Actor;
use crate::ipc::helpers::{parse_params, with_actor, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::notify;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    unread_only: bool,
    page: Option<u32>,
    per_page: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadParams {
    ids: Option<Vec<String>>,
}

fn notifications_list(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: ListParams = parse_params(params)?;
    let per_page = p.per_page.unwrap_or(20);
    if !(1..=200).contains(&per_page) {
        return Err(HandlerErr::bad_params("perPage must be between 1 and 200"));
    }
    let page = notify::list_inbox(conn, &actor.id, p.unread_only, p.page.unwrap_or(1), per_page)?;
    Ok(json!(page))
}

fn notifications_mark_read(
    conn: &Connection,
    actor: &Actor,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let p: MarkReadParams = parse_params(params)?;
    let updated = notify::mark_read(conn, &actor.id, p.ids.as_deref())?;
    Ok(json!({ "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let state = &*state;
    let params = &req.params;
    match req.method.as_str() {
        "notifications.list" => Some(with_actor(state, req, |c, a| {
            notifications_list(c, a, params)
        })),
        "notifications.markRead" => Some(with_actor(state, req, |c, a| {
            notifications_mark_read(c, a, params)
        })),
        _ => None,
    }
}
