use crate::ipc::error::{core_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::period;
use serde_json::json;
use std::path::PathBuf;
use tracing::error;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "today": state.clock.today().format("%Y-%m-%d").to_string(),
            "period": state.clock.current_period(),
            "notifications": state.notifier.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match state.open_workspace(&path) {
        Ok(()) => ok(&req.id, json!({ "workspacePath": path.to_string_lossy() })),
        Err(e) => {
            error!(workspace = %path.display(), error = %format!("{e:#}"), "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:#}"), None)
        }
    }
}

fn handle_period_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let date = match req.params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => match period::parse_date(raw) {
            Ok(d) => d,
            Err(e) => return core_err(&req.id, &e),
        },
        None => state.clock.today(),
    };
    let p = period::resolve(date);
    ok(
        &req.id,
        json!({
            "date": date.format("%Y-%m-%d").to_string(),
            "year": p.year,
            "semester": p.semester,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "period.current" => Some(handle_period_current(state, req)),
        _ => None,
    }
}
