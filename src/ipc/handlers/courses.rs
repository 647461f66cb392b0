use crate::db;
use crate::import::validate::parse_credit_hours;
use crate::ipc::helpers::{db_err, get_opt_i64, get_opt_str, get_paging, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Course;
use rusqlite::Connection;
use serde_json::{json, Value};

fn courses_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (limit, offset) = get_paging(params)?;
    let department = get_opt_str(params, "department")?;

    let mut stmt = conn
        .prepare(
            "SELECT c.course_code, c.course_title, c.credit_hours, c.department, c.instructor,
                    (SELECT COUNT(*) FROM grades g WHERE g.course_code = c.course_code)
             FROM courses c
             WHERE (?1 IS NULL OR c.department = ?1)
             ORDER BY c.course_code
             LIMIT ?2 OFFSET ?3",
        )
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map((department, limit, offset), |r| {
            let code: String = r.get(0)?;
            let title: String = r.get(1)?;
            let credit_hours: i64 = r.get(2)?;
            let department: Option<String> = r.get(3)?;
            let instructor: Option<String> = r.get(4)?;
            let grade_count: i64 = r.get(5)?;
            Ok(json!({
                "courseCode": code,
                "courseTitle": title,
                "creditHours": credit_hours,
                "department": department,
                "instructor": instructor,
                "gradeCount": grade_count,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "courses": rows }))
}

fn courses_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "courseCode")?;
    let course = db::get_course(conn, &code)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "course": course }))
}

fn courses_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let credit_hours = get_opt_i64(params, "creditHours")?
        .ok_or_else(|| HandlerErr::bad_params("missing creditHours"))?;
    let credit_hours =
        parse_credit_hours(&credit_hours.to_string()).map_err(HandlerErr::bad_params)?;
    let course = Course {
        course_code: get_required_str(params, "courseCode")?,
        course_title: get_required_str(params, "courseTitle")?,
        credit_hours,
        department: get_opt_str(params, "department")?,
        instructor: get_opt_str(params, "instructor")?,
    };
    db::upsert_course(conn, &course).map_err(db_err("db_insert_failed"))?;
    let saved = db::get_course(conn, &course.course_code)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("course not found"))?;
    Ok(json!({ "course": saved }))
}

/// Courses with recorded grades cannot be removed.
fn courses_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let code = get_required_str(params, "courseCode")?;
    let grade_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grades WHERE course_code = ?",
            [&code],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;
    if grade_count > 0 {
        return Err(HandlerErr::new(
            "conflict",
            format!("course {} has {} recorded grades", code, grade_count),
        )
        .with_details(json!({ "gradeCount": grade_count })));
    }
    let removed = conn
        .execute("DELETE FROM courses WHERE course_code = ?", [&code])
        .map_err(db_err("db_delete_failed"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }
    tracing::info!(course_code = %code, "course deleted");
    Ok(json!({ "ok": true }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, courses_list)
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, courses_get)
}

fn handle_courses_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, courses_upsert)
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, courses_delete)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.upsert" => Some(handle_courses_upsert(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
