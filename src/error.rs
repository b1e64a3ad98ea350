use rusqlite::ffi;
use rusqlite::ErrorCode;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("storage error: {0}")]
    Storage(rusqlite::Error),
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::BadRequest(_) => "bad_request",
            CoreError::Forbidden(_) => "forbidden",
            CoreError::Conflict(_) => "conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::InvalidState(_) => "invalid_state",
            CoreError::Storage(_) => "db_error",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CoreError::Storage(e) => Some(json!({ "sqlite": e.to_string() })),
            _ => None,
        }
    }
}

fn is_uniqueness(f: &ffi::Error) -> bool {
    f.code == ErrorCode::ConstraintViolation
        && matches!(
            f.extended_code,
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        )
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        // A racing writer that slipped past a pre-check loses here, on the unique index.
        // Foreign key, CHECK and NOT NULL failures stay storage errors.
        if let rusqlite::Error::SqliteFailure(f, msg) = &e {
            if is_uniqueness(f) {
                let detail = msg.clone().unwrap_or_else(|| "constraint violated".to_string());
                return CoreError::Conflict(detail);
            }
        }
        CoreError::Storage(e)
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
