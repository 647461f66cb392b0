use crate::calc::{
    calculate_grade, calculate_grade_str, get_grade_point, gpa_breakdown, GpaBreakdown, GpaEntry,
    GradeScale, LetterGrade,
};
use crate::db::{self, GradeFilter, GradeRow};
use crate::import::validate::{parse_credit_hours, parse_score};
use crate::ipc::handlers::setup::load_grading;
use crate::ipc::helpers::{
    db_err, get_opt_f64, get_opt_i64, get_opt_scale, get_opt_str, get_paging, get_required_str,
    with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Course, GradeEntry, GradePolicy};
use rusqlite::Connection;
use serde_json::{json, Value};

/// Explicit `scale` parameter, else the workspace default.
pub(crate) fn resolve_scale(conn: &Connection, params: &Value) -> Result<GradeScale, HandlerErr> {
    match get_opt_scale(params, "scale")? {
        Some(s) => Ok(s),
        None => Ok(load_grading(conn).map_err(db_err("db_query_failed"))?.scale),
    }
}

pub(crate) fn grade_row_json(row: &GradeRow, scale: GradeScale) -> Value {
    json!({
        "indexNumber": row.index_number,
        "fullName": row.full_name,
        "courseCode": row.course_code,
        "courseTitle": row.course_title,
        "semester": row.semester,
        "academicYear": row.academic_year,
        "score": row.score,
        "creditHours": row.credit_hours,
        "letterGrade": row.letter_grade,
        "gradePoints": get_grade_point(row.score, scale),
    })
}

pub(crate) fn all_grades(conn: &Connection, filter: &GradeFilter) -> Result<Vec<GradeRow>, HandlerErr> {
    // SQLite reads a negative LIMIT as unbounded.
    db::list_grades(conn, filter, -1, 0).map_err(db_err("db_query_failed"))
}

pub(crate) fn gpa_entries(rows: &[GradeRow]) -> Vec<GpaEntry> {
    rows.iter()
        .map(|r| GpaEntry {
            score: Some(r.score),
            credit_hours: r.credit_hours,
        })
        .collect()
}

/// GPA for one student, optionally narrowed to a semester and/or year.
pub(crate) fn student_gpa(
    conn: &Connection,
    index_number: &str,
    semester: Option<String>,
    academic_year: Option<String>,
    scale: GradeScale,
) -> Result<GpaBreakdown, HandlerErr> {
    if db::get_student(conn, index_number)
        .map_err(db_err("db_query_failed"))?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }
    let filter = GradeFilter {
        index_number: Some(index_number.to_string()),
        semester,
        academic_year,
        ..GradeFilter::default()
    };
    let rows = all_grades(conn, &filter)?;
    Ok(gpa_breakdown(&gpa_entries(&rows), scale))
}

fn filter_from_params(params: &Value) -> Result<GradeFilter, HandlerErr> {
    Ok(GradeFilter {
        index_number: get_opt_str(params, "indexNumber")?,
        course_code: get_opt_str(params, "courseCode")?,
        semester: get_opt_str(params, "semester")?,
        academic_year: get_opt_str(params, "academicYear")?,
    })
}

fn grades_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = filter_from_params(params)?;
    let (limit, offset) = get_paging(params)?;
    let scale = resolve_scale(conn, params)?;
    let total = db::count_grades(conn, &filter).map_err(db_err("db_query_failed"))?;
    let rows = db::list_grades(conn, &filter, limit, offset).map_err(db_err("db_query_failed"))?;
    let grades: Vec<Value> = rows.iter().map(|r| grade_row_json(r, scale)).collect();
    Ok(json!({ "grades": grades, "total": total }))
}

/// Records or corrects one grade. An unknown course is created when
/// `courseTitle` and `creditHours` are supplied.
fn grades_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let index_number = get_required_str(params, "indexNumber")?;
    let course_code = get_required_str(params, "courseCode")?;
    let semester = get_required_str(params, "semester")?;
    let academic_year = get_required_str(params, "academicYear")?;
    let score = get_opt_f64(params, "score")?
        .ok_or_else(|| HandlerErr::bad_params("missing score"))
        .and_then(|s| parse_score(&s.to_string()).map_err(HandlerErr::bad_params))?;
    let credit_override = get_opt_i64(params, "creditHours")?
        .map(|c| parse_credit_hours(&c.to_string()).map_err(HandlerErr::bad_params))
        .transpose()?;
    let title_override = get_opt_str(params, "courseTitle")?;
    let scale = resolve_scale(conn, params)?;

    if db::get_student(conn, &index_number)
        .map_err(db_err("db_query_failed"))?
        .is_none()
    {
        return Err(HandlerErr::not_found("student not found"));
    }
    let course = match db::get_course(conn, &course_code).map_err(db_err("db_query_failed"))? {
        Some(c) => c,
        None => match (title_override.clone(), credit_override) {
            (Some(course_title), Some(credit_hours)) => Course {
                course_code: course_code.clone(),
                course_title,
                credit_hours,
                department: None,
                instructor: None,
            },
            _ => {
                return Err(HandlerErr::not_found(
                    "course not found; supply courseTitle and creditHours to create it",
                ))
            }
        },
    };

    let letter = calculate_grade(score);
    let entry = GradeEntry {
        index_number,
        course_code,
        course_title: title_override.unwrap_or(course.course_title.clone()),
        semester,
        academic_year,
        score,
        credit_hours: credit_override.unwrap_or(course.credit_hours),
        letter_grade: letter,
        grade_points: letter.points(scale),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    db::upsert_course(
        &tx,
        &Course {
            course_title: entry.course_title.clone(),
            ..course
        },
    )
    .map_err(db_err("db_insert_failed"))?;
    db::ensure_semester(&tx, &entry.semester, &entry.academic_year)
        .map_err(db_err("db_insert_failed"))?;
    db::write_grade(&tx, &entry, GradePolicy::Upsert).map_err(db_err("db_insert_failed"))?;
    tx.commit().map_err(db_err("db_commit_failed"))?;

    tracing::info!(
        index_number = %entry.index_number,
        course_code = %entry.course_code,
        letter = entry.letter_grade.as_str(),
        "grade saved"
    );
    Ok(json!({ "grade": entry }))
}

fn grades_gpa(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let index_number = get_required_str(params, "indexNumber")?;
    let scale = resolve_scale(conn, params)?;
    let breakdown = student_gpa(
        conn,
        &index_number,
        get_opt_str(params, "semester")?,
        get_opt_str(params, "academicYear")?,
        scale,
    )?;
    Ok(json!({ "indexNumber": index_number, "gpa": breakdown }))
}

/// Grades a raw score without saving anything. Strings are accepted and
/// anything that does not parse comes back as an F.
fn grades_classify(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scale = resolve_scale(conn, params)?;
    let letter = match params.get("score") {
        None | Some(Value::Null) => return Err(HandlerErr::bad_params("missing score")),
        Some(Value::Number(n)) => n.as_f64().map_or(LetterGrade::F, calculate_grade),
        Some(Value::String(s)) => calculate_grade_str(s),
        Some(other) => calculate_grade_str(&other.to_string()),
    };
    Ok(json!({
        "letterGrade": letter.as_str(),
        "gradePoints": letter.points(scale),
        "scale": scale.as_f64(),
    }))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, grades_list)
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, grades_upsert)
}

fn handle_grades_gpa(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, grades_gpa)
}

fn handle_grades_classify(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, grades_classify)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.gpa" => Some(handle_grades_gpa(state, req)),
        "grades.classify" => Some(handle_grades_classify(state, req)),
        _ => None,
    }
}
