use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::warn;

use crate::actor::Actor;
use crate::error::CoreError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::notify::{self, Notice};
use crate::period::{AcademicPeriod, Semester};
use crate::policy::{self, Facts, Operation};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<CoreError> for HandlerErr {
    fn from(e: CoreError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

/// Deserializes `params` into a typed struct; a missing params object reads
/// as `{}` so all-optional structs work without one.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    let value = if params.is_null() {
        serde_json::json!({})
    } else {
        params.clone()
    };
    serde_json::from_value(value).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Runs an actor-scoped handler against the open workspace.
pub fn with_actor(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &Actor) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(actor) = req.actor.as_ref() else {
        return err(&req.id, "unauthenticated", "request carries no actor", None);
    };
    match f(conn, actor) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), HandlerErr> {
    policy::enforce(actor, Operation::ManageDirectory, &Facts::default())?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct PeriodParam {
    pub year: String,
    pub semester: Semester,
}

/// An explicit period is validated; an absent one is the clock's current period.
pub fn period_or_current(
    state: &AppState,
    param: Option<PeriodParam>,
) -> Result<AcademicPeriod, HandlerErr> {
    match param {
        Some(p) => Ok(AcademicPeriod::new(&p.year, p.semester)?),
        None => Ok(state.clock.current_period()),
    }
}

pub fn explicit_period(param: Option<PeriodParam>) -> Result<Option<AcademicPeriod>, HandlerErr> {
    param
        .map(|p| AcademicPeriod::new(&p.year, p.semester))
        .transpose()
        .map_err(HandlerErr::from)
}

pub struct Announcement<'a> {
    pub event_type: &'static str,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
    pub teachers: Vec<&'a str>,
    pub class_id: Option<&'a str>,
}

/// Computes recipients and hands the notice to the worker. Runs after the
/// mutation committed; nothing here can fail the request.
pub fn announce(state: &AppState, conn: &Connection, a: Announcement<'_>) {
    let Some(notifier) = state.notifier.as_ref() else {
        return;
    };
    let recipients = match notify::recipients(conn, &a.teachers, a.class_id) {
        Ok(r) => r,
        Err(e) => {
            warn!(event = a.event_type, error = %e, "notification recipients unavailable");
            return;
        }
    };
    notifier.dispatch(Notice {
        event_type: a.event_type,
        title: a.title,
        body: a.body,
        payload: a.payload,
        recipients,
        created_at: state.clock.now().to_rfc3339(),
    });
}
