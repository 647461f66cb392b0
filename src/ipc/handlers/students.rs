use crate::db;
use crate::import::validate::{parse_iso_date, parse_year_of_study};
use crate::ipc::helpers::{
    db_err, get_opt_i64, get_opt_str, get_paging, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::StudentProfile;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};

fn student_json(p: &StudentProfile) -> Result<Value, HandlerErr> {
    serde_json::to_value(p).map_err(db_err("internal_error"))
}

fn opt_dob(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    get_opt_str(params, key)?
        .map(|s| {
            parse_iso_date(&s)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
        })
        .transpose()
}

fn opt_year(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    get_opt_i64(params, key)?
        .map(|y| parse_year_of_study(&y.to_string()).map_err(HandlerErr::bad_params))
        .transpose()
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (limit, offset) = get_paging(params)?;
    let program = get_opt_str(params, "program")?;
    let year = get_opt_i64(params, "yearOfStudy")?;

    let mut where_sql = String::from(" WHERE 1=1");
    let mut binds: Vec<SqlValue> = Vec::new();
    if let Some(p) = program {
        where_sql.push_str(" AND program = ?");
        binds.push(SqlValue::Text(p));
    }
    if let Some(y) = year {
        where_sql.push_str(" AND year_of_study = ?");
        binds.push(SqlValue::Integer(y));
    }

    let total: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM students{}", where_sql),
            params_from_iter(binds.iter()),
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;

    binds.push(SqlValue::Integer(limit));
    binds.push(SqlValue::Integer(offset));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT index_number, full_name, dob, gender, program, year_of_study, contact_info
             FROM students{}
             ORDER BY index_number
             LIMIT ? OFFSET ?",
            where_sql
        ))
        .map_err(db_err("db_query_failed"))?;
    let students = stmt
        .query_map(params_from_iter(binds.iter()), db::student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    Ok(json!({ "students": students, "total": total }))
}

fn students_search(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let query = get_required_str(params, "query")?;
    let (limit, _) = get_paging(params)?;
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped);

    let mut stmt = conn
        .prepare(
            "SELECT index_number, full_name, dob, gender, program, year_of_study, contact_info
             FROM students
             WHERE index_number LIKE ?1 ESCAPE '\\' OR full_name LIKE ?1 ESCAPE '\\'
             ORDER BY full_name, index_number
             LIMIT ?2",
        )
        .map_err(db_err("db_query_failed"))?;
    let students = stmt
        .query_map((pattern, limit), db::student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let index_number = get_required_str(params, "indexNumber")?;
    let Some(student) = db::get_student(conn, &index_number).map_err(db_err("db_query_failed"))?
    else {
        return Err(HandlerErr::not_found("student not found"));
    };
    let grade_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM grades WHERE index_number = ?",
            [&index_number],
            |r| r.get(0),
        )
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "student": student_json(&student)?, "gradeCount": grade_count }))
}

fn students_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let profile = StudentProfile {
        index_number: get_required_str(params, "indexNumber")?,
        full_name: get_required_str(params, "fullName")?,
        dob: opt_dob(params, "dob")?,
        gender: get_opt_str(params, "gender")?,
        program: get_opt_str(params, "program")?,
        year_of_study: opt_year(params, "yearOfStudy")?,
        contact_info: get_opt_str(params, "contactInfo")?,
    };
    let existed = db::get_student(conn, &profile.index_number)
        .map_err(db_err("db_query_failed"))?
        .is_some();
    db::upsert_student(conn, &profile).map_err(db_err("db_insert_failed"))?;
    tracing::info!(index_number = %profile.index_number, created = !existed, "student saved");
    Ok(json!({ "student": student_json(&profile)?, "created": !existed }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let index_number = get_required_str(params, "indexNumber")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut binds: Vec<SqlValue> = Vec::new();
    let text = |v: Option<String>| v.map(SqlValue::Text).unwrap_or(SqlValue::Null);

    if patch.get("fullName").is_some() {
        let name = get_required_str(patch, "fullName")
            .map_err(|_| HandlerErr::bad_params("fullName must not be empty"))?;
        set_parts.push("full_name = ?");
        binds.push(SqlValue::Text(name));
    }
    if patch.get("dob").is_some() {
        set_parts.push("dob = ?");
        binds.push(text(opt_dob(patch, "dob")?));
    }
    if patch.get("gender").is_some() {
        set_parts.push("gender = ?");
        binds.push(text(get_opt_str(patch, "gender")?));
    }
    if patch.get("program").is_some() {
        set_parts.push("program = ?");
        binds.push(text(get_opt_str(patch, "program")?));
    }
    if patch.get("yearOfStudy").is_some() {
        set_parts.push("year_of_study = ?");
        binds.push(
            opt_year(patch, "yearOfStudy")?
                .map(SqlValue::Integer)
                .unwrap_or(SqlValue::Null),
        );
    }
    if patch.get("contactInfo").is_some() {
        set_parts.push("contact_info = ?");
        binds.push(text(get_opt_str(patch, "contactInfo")?));
    }
    if set_parts.is_empty() {
        return Err(HandlerErr::bad_params("patch has no known fields"));
    }

    set_parts.push("updated_at = ?");
    binds.push(SqlValue::Text(db::now_rfc3339()));
    binds.push(SqlValue::Text(index_number.clone()));
    let sql = format!(
        "UPDATE students SET {} WHERE index_number = ?",
        set_parts.join(", ")
    );
    let changed = conn
        .execute(&sql, params_from_iter(binds.iter()))
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }

    let student = db::get_student(conn, &index_number)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    Ok(json!({ "student": student_json(&student)? }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, students_list)
}

fn handle_students_search(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, students_search)
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, students_get)
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, students_upsert)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, students_update)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.search" => Some(handle_students_search(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        _ => None,
    }
}
