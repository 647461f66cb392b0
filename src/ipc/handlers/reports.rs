use crate::calc::{
    calculate_gpa, calculate_grade, get_grade_point, gpa_breakdown, round_2, summarize_grades,
    GpaEntry, GradeScale, LetterGrade,
};
use crate::db::{self, GradeFilter, GradeRow};
use crate::ipc::handlers::grades::{all_grades, gpa_entries, resolve_scale};
use crate::ipc::helpers::{db_err, get_opt_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

fn letter_of(row: &GradeRow) -> LetterGrade {
    row.letter_grade
        .parse::<LetterGrade>()
        .unwrap_or_else(|_| calculate_grade(row.score))
}

fn distribution_json(rows: &[GradeRow]) -> Value {
    let counts = summarize_grades(rows.iter().map(letter_of));
    let mut out = Map::new();
    for (letter, n) in counts {
        out.insert(letter.as_str().to_string(), json!(n));
    }
    Value::Object(out)
}

fn average_score(rows: &[GradeRow]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    Some(round_2(rows.iter().map(|r| r.score).sum::<f64>() / rows.len() as f64))
}

/// Courses grouped by term in chronological order, with a term GPA and a
/// running cumulative GPA after each term.
pub(crate) fn transcript(conn: &Connection, index_number: &str, scale: GradeScale) -> Result<Value, HandlerErr> {
    let student = db::get_student(conn, index_number)
        .map_err(db_err("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let rows = all_grades(
        conn,
        &GradeFilter {
            index_number: Some(index_number.to_string()),
            ..GradeFilter::default()
        },
    )?;

    let mut terms: Vec<Value> = Vec::new();
    let mut cumulative: Vec<GpaEntry> = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        let key = (&rows[start].academic_year, &rows[start].semester);
        let end = rows[start..]
            .iter()
            .position(|r| (&r.academic_year, &r.semester) != key)
            .map_or(rows.len(), |n| start + n);
        let term = &rows[start..end];

        let entries = gpa_entries(term);
        cumulative.extend_from_slice(&entries);
        let term_gpa = gpa_breakdown(&entries, scale);
        let courses: Vec<Value> = term
            .iter()
            .map(|r| {
                json!({
                    "courseCode": r.course_code,
                    "courseTitle": r.course_title,
                    "score": r.score,
                    "creditHours": r.credit_hours,
                    "letterGrade": letter_of(r).as_str(),
                    "gradePoints": get_grade_point(r.score, scale),
                })
            })
            .collect();
        terms.push(json!({
            "academicYear": key.0,
            "semester": key.1,
            "courses": courses,
            "credits": term_gpa.total_credits,
            "semesterGpa": term_gpa.gpa,
            "cumulativeGpa": gpa_breakdown(&cumulative, scale).gpa,
        }));
        start = end;
    }

    let overall = gpa_breakdown(&cumulative, scale);
    Ok(json!({
        "student": student,
        "scale": scale.as_f64(),
        "terms": terms,
        "cumulativeGpa": overall.gpa,
        "totalCredits": overall.total_credits,
        "totalCourses": overall.total_courses,
    }))
}

fn reports_transcript(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let index_number = get_required_str(params, "indexNumber")?;
    let scale = resolve_scale(conn, params)?;
    transcript(conn, &index_number, scale)
}

fn reports_grade_distribution(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let filter = GradeFilter {
        index_number: None,
        course_code: get_opt_str(params, "courseCode")?,
        semester: get_opt_str(params, "semester")?,
        academic_year: get_opt_str(params, "academicYear")?,
    };
    let rows = all_grades(conn, &filter)?;
    Ok(json!({
        "distribution": distribution_json(&rows),
        "total": rows.len(),
        "averageScore": average_score(&rows),
    }))
}

fn count(conn: &Connection, table: &str) -> Result<i64, HandlerErr> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .map_err(db_err("db_query_failed"))
}

fn reports_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let scale = resolve_scale(conn, params)?;
    let rows = all_grades(conn, &GradeFilter::default())?;

    // Mean of per-student GPAs, not a GPA over every grade.
    let mut by_student: BTreeMap<&str, Vec<GpaEntry>> = BTreeMap::new();
    for r in &rows {
        by_student
            .entry(r.index_number.as_str())
            .or_default()
            .push(GpaEntry {
                score: Some(r.score),
                credit_hours: r.credit_hours,
            });
    }
    let average_gpa = if by_student.is_empty() {
        None
    } else {
        let sum: f64 = by_student.values().map(|e| calculate_gpa(e, scale)).sum();
        Some(round_2(sum / by_student.len() as f64))
    };

    let current: Option<(String, String)> = conn
        .query_row(
            "SELECT semester_name, academic_year FROM semesters WHERE is_current = 1 LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;

    Ok(json!({
        "students": count(conn, "students")?,
        "courses": count(conn, "courses")?,
        "semesters": count(conn, "semesters")?,
        "grades": rows.len(),
        "importRuns": count(conn, "import_runs")?,
        "currentSemester": current.map(|(s, y)| json!({ "semesterName": s, "academicYear": y })),
        "averageScore": average_score(&rows),
        "averageGpa": average_gpa,
        "scale": scale.as_f64(),
        "distribution": distribution_json(&rows),
    }))
}

/// Students per program and year of study. With `academicYear`, only
/// students holding a grade in that year are counted.
fn reports_enrollment(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let academic_year = get_opt_str(params, "academicYear")?;
    let (sql, args): (&str, Vec<&str>) = match academic_year.as_deref() {
        Some(year) => (
            "SELECT s.program, s.year_of_study, COUNT(DISTINCT s.index_number)
             FROM students s
             JOIN grades g ON g.index_number = s.index_number
             WHERE g.academic_year = ?
             GROUP BY s.program, s.year_of_study
             ORDER BY s.program IS NULL, s.program, s.year_of_study",
            vec![year],
        ),
        None => (
            "SELECT s.program, s.year_of_study, COUNT(*)
             FROM students s
             GROUP BY s.program, s.year_of_study
             ORDER BY s.program IS NULL, s.program, s.year_of_study",
            Vec::new(),
        ),
    };
    let mut stmt = conn.prepare(sql).map_err(db_err("db_query_failed"))?;
    let groups = stmt
        .query_map(params_from_iter(args), |r| {
            let program: Option<String> = r.get(0)?;
            let year: Option<i64> = r.get(1)?;
            let students: i64 = r.get(2)?;
            Ok((program, year, students))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;

    let mut by_program: BTreeMap<Option<&str>, i64> = BTreeMap::new();
    for (program, _, n) in &groups {
        *by_program.entry(program.as_deref()).or_default() += n;
    }
    let total: i64 = groups.iter().map(|(_, _, n)| n).sum();
    let rows: Vec<Value> = groups
        .iter()
        .map(|(program, year, n)| json!({ "program": program, "yearOfStudy": year, "students": n }))
        .collect();
    let programs: Vec<Value> = by_program
        .iter()
        .map(|(program, n)| json!({ "program": program, "students": n }))
        .collect();
    Ok(json!({
        "academicYear": academic_year,
        "groups": rows,
        "programs": programs,
        "total": total,
    }))
}

fn handle_reports_transcript(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, reports_transcript)
}

fn handle_reports_grade_distribution(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, reports_grade_distribution)
}

fn handle_reports_enrollment(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, reports_enrollment)
}

fn handle_reports_summary(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, reports_summary)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.transcript" => Some(handle_reports_transcript(state, req)),
        "reports.gradeDistribution" => Some(handle_reports_grade_distribution(state, req)),
        "reports.summary" => Some(handle_reports_summary(state, req)),
        "reports.enrollment" => Some(handle_reports_enrollment(state, req)),
        _ => None,
    }
}
