use crate::auth::{AuthError, Role, Session};
use crate::calc::GradeScale;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::Value;
use std::fmt::Display;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug)]
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

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        HandlerErr::new(e.code(), e.to_string())
    }
}

/// `.map_err(db_err("db_query_failed"))`
pub fn db_err<E: Display>(code: &'static str) -> impl Fn(E) -> HandlerErr {
    move |e| HandlerErr::new(code, e.to_string())
}

pub fn respond(req: &Request, result: Result<Value, HandlerErr>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

/// Runs `f` against the open workspace, or answers `no_workspace`.
pub fn with_db<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(req, f(conn, &req.params))
}

/// Methods that read per-user state need both a workspace and a session.
pub fn with_session<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &Session, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = require_session(state).and_then(|session| f(conn, session, &req.params));
    respond(req, result)
}

pub fn require_session(state: &AppState) -> Result<&Session, HandlerErr> {
    state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("unauthorized", "log in first"))
}

pub fn require_role(state: &AppState, role: Role) -> Result<&Session, HandlerErr> {
    let session = require_session(state)?;
    if session.role != role {
        return Err(HandlerErr::new(
            "forbidden",
            format!("{} access required", role.as_str()),
        ));
    }
    Ok(session)
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank all read as `None`.
pub fn get_opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_opt_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_opt_f64(params: &Value, key: &str) -> Result<Option<f64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key))),
    }
}

pub fn get_opt_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

/// `scale` as a number (4, 5.0) or a numeric string.
pub fn get_opt_scale(params: &Value, key: &str) -> Result<Option<GradeScale>, HandlerErr> {
    let parsed = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("{} must be 4.0 or 5.0", key))
            .and_then(GradeScale::try_from),
        Some(Value::String(s)) => s.parse::<GradeScale>(),
        Some(_) => Err(format!("{} must be 4.0 or 5.0", key)),
    };
    parsed.map(Some).map_err(HandlerErr::bad_params)
}

/// `(limit, offset)` with defaults and bounds applied.
pub fn get_paging(params: &Value) -> Result<(i64, i64), HandlerErr> {
    let limit = get_opt_i64(params, "limit")?.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(HandlerErr::bad_params(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let offset = get_opt_i64(params, "offset")?.unwrap_or(0);
    if offset < 0 {
        return Err(HandlerErr::bad_params("offset must be >= 0"));
    }
    Ok((limit, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_strings_are_trimmed_and_non_empty() {
        let p = json!({ "a": "  x ", "b": "   ", "c": 3 });
        assert_eq!(get_required_str(&p, "a").expect("a"), "x");
        assert_eq!(get_required_str(&p, "b").expect_err("b").code, "bad_params");
        assert_eq!(get_required_str(&p, "c").expect_err("c").message, "missing c");
    }

    #[test]
    fn scale_accepts_numbers_and_strings() {
        assert_eq!(
            get_opt_scale(&json!({ "scale": 5 }), "scale").expect("5"),
            Some(GradeScale::FivePoint)
        );
        assert_eq!(
            get_opt_scale(&json!({ "scale": "4.0" }), "scale").expect("4.0"),
            Some(GradeScale::FourPoint)
        );
        assert_eq!(get_opt_scale(&json!({}), "scale").expect("absent"), None);
        assert!(get_opt_scale(&json!({ "scale": 10 }), "scale").is_err());
        assert!(get_opt_scale(&json!({ "scale": true }), "scale").is_err());
    }

    #[test]
    fn paging_defaults_and_bounds() {
        assert_eq!(get_paging(&json!({})).expect("default"), (100, 0));
        assert_eq!(get_paging(&json!({ "limit": 5, "offset": 10 })).expect("set"), (5, 10));
        assert!(get_paging(&json!({ "limit": 0 })).is_err());
        assert!(get_paging(&json!({ "offset": -1 })).is_err());
    }
}
