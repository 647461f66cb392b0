use crate::auth::Role;
use crate::db::{self, GradeFilter};
use crate::ipc::error::err;
use crate::ipc::handlers::grades::{all_grades, grade_row_json, resolve_scale, student_gpa};
use crate::ipc::helpers::{db_err, get_opt_str, require_role, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Self-service reads for the logged-in student; the index number always
/// comes from the session, never from params.
fn with_student<F>(state: &AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&Connection, &str, &Value) -> Result<Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let result = require_role(state, Role::Student)
        .and_then(|session| f(conn, &session.username, &req.params));
    respond(req, result)
}

fn me_profile(conn: &Connection, index_number: &str, _params: &Value) -> Result<Value, HandlerErr> {
    let student = db::get_student(conn, index_number)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student profile not found"))?;
    Ok(json!({ "student": student }))
}

fn me_grades(conn: &Connection, index_number: &str, params: &Value) -> Result<Value, HandlerErr> {
    let scale = resolve_scale(conn, params)?;
    let filter = GradeFilter {
        index_number: Some(index_number.to_string()),
        semester: get_opt_str(params, "semester")?,
        academic_year: get_opt_str(params, "academicYear")?,
        ..GradeFilter::default()
    };
    let rows = all_grades(conn, &filter)?;
    let grades: Vec<Value> = rows.iter().map(|r| grade_row_json(r, scale)).collect();
    Ok(json!({ "grades": grades }))
}

fn me_gpa(conn: &Connection, index_number: &str, params: &Value) -> Result<Value, HandlerErr> {
    let scale = resolve_scale(conn, params)?;
    let breakdown = student_gpa(
        conn,
        index_number,
        get_opt_str(params, "semester")?,
        get_opt_str(params, "academicYear")?,
        scale,
    )?;
    Ok(json!({ "indexNumber": index_number, "gpa": breakdown }))
}

fn handle_me_profile(state: &mut AppState, req: &Request) -> Value {
    with_student(state, req, me_profile)
}

fn handle_me_grades(state: &mut AppState, req: &Request) -> Value {
    with_student(state, req, me_grades)
}

fn handle_me_gpa(state: &mut AppState, req: &Request) -> Value {
    with_student(state, req, me_gpa)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "me.profile" => Some(handle_me_profile(state, req)),
        "me.grades" => Some(handle_me_grades(state, req)),
        "me.gpa" => Some(handle_me_gpa(state, req)),
        _ => None,
    }
}
