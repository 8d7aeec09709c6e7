use crate::auth::{AuthError, RegistrationError, Role, Session};
use crate::ipc::error::{err, ok};
use crate::ipc::types::AppState;
use crate::schedule::ScheduleError;
use chrono::NaiveDate;
use rusqlite::{Connection, ErrorCode};
use serde_json::{json, Value};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_failed", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

/// Maps a rusqlite failure to `code`. Constraint violations surface as `conflict`.
pub fn db_err(code: &'static str) -> impl Fn(rusqlite::Error) -> HandlerErr {
    move |e| match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            HandlerErr::conflict(e.to_string())
        }
        _ => HandlerErr::new(code, e.to_string()),
    }
}

impl From<ScheduleError> for HandlerErr {
    fn from(e: ScheduleError) -> Self {
        let out = HandlerErr::new(e.code(), e.to_string());
        match e {
            ScheduleError::ScheduleConflict { conflicting_ids } => {
                out.with_details(json!({ "conflictingIds": conflicting_ids }))
            }
            ScheduleError::InvalidTimeRange => out,
        }
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

impl From<RegistrationError> for HandlerErr {
    fn from(e: RegistrationError) -> Self {
        HandlerErr::validation(e.to_string())
    }
}

pub fn respond(id: &str, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => e.response(id),
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "login required"))
}

pub fn require_role(state: &AppState, role: Role) -> Result<&Session, HandlerErr> {
    let session = require_session(state)?;
    if session.role != role {
        return Err(HandlerErr::new(
            "forbidden",
            format!("{} access required", role.label()),
        ));
    }
    Ok(session)
}

/// Workspace connection plus a session holding `role`.
pub fn conn_as(state: &AppState, role: Role) -> Result<(&Connection, &Session), HandlerErr> {
    let conn = db_conn(state)?;
    let session = require_role(state, role)?;
    Ok((conn, session))
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn opt_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn params_object<'a>(
    params: &'a Value,
    key: &str,
) -> Result<&'a serde_json::Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

pub fn parse_bool(v: &Value, key: &str) -> Result<bool, HandlerErr> {
    v.as_bool()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key)))
}

pub fn parse_date(v: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    v.as_str()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

/// `null` or absent reads as `None`.
pub fn opt_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => parse_date(v, key).map(Some),
    }
}

pub fn string_list(v: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let arr = v
        .as_array()
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an array", key)))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

pub fn amount(v: &Value, key: &str) -> Result<f64, HandlerErr> {
    crate::calc::parse_amount(v).ok_or_else(|| {
        HandlerErr::bad_params(format!("{} must be a non-negative number", key))
    })
}

pub fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64, HandlerErr> {
    conn.query_row(sql, params, |r| r.get(0))
        .map_err(db_err("db_query_failed"))
}

pub fn exists(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<bool, HandlerErr> {
    Ok(count(conn, sql, params)? > 0)
}
