use crate::import::validate::parse_iso_date;
use crate::ipc::helpers::{db_err, get_opt_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const SEMESTER_COLUMNS: &str =
    "id, semester_name, academic_year, start_date, end_date, is_current";

fn semester_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let id: String = r.get(0)?;
    let name: String = r.get(1)?;
    let year: String = r.get(2)?;
    let start: Option<String> = r.get(3)?;
    let end: Option<String> = r.get(4)?;
    let current: i64 = r.get(5)?;
    Ok(json!({
        "id": id,
        "semesterName": name,
        "academicYear": year,
        "startDate": start,
        "endDate": end,
        "isCurrent": current != 0,
    }))
}

fn semesters_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM semesters ORDER BY academic_year DESC, semester_name",
            SEMESTER_COLUMNS
        ))
        .map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map([], semester_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "semesters": rows }))
}

fn semesters_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "semesterName")?;
    let year = get_required_str(params, "academicYear")?;
    let mut dates = Vec::with_capacity(2);
    for key in ["startDate", "endDate"] {
        let d = get_opt_str(params, key)?
            .map(|s| parse_iso_date(&s).map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e))))
            .transpose()?;
        dates.push(d);
    }
    if let (Some(start), Some(end)) = (dates[0], dates[1]) {
        if end < start {
            return Err(HandlerErr::bad_params("endDate must not be before startDate"));
        }
    }

    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM semesters WHERE semester_name = ? AND academic_year = ?",
            (&name, &year),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if let Some(id) = exists {
        return Err(HandlerErr::new(
            "conflict",
            format!("semester {} {} already exists", name, year),
        )
        .with_details(json!({ "id": id })));
    }

    let id = Uuid::new_v4().to_string();
    let fmt = |d: Option<chrono::NaiveDate>| d.map(|d| d.format("%Y-%m-%d").to_string());
    conn.execute(
        "INSERT INTO semesters(id, semester_name, academic_year, start_date, end_date)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &name, &year, fmt(dates[0]), fmt(dates[1])),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": id }))
}

/// Exactly one semester is current after this succeeds.
fn semesters_set_current(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let tx = conn
        .unchecked_transaction()
        .map_err(db_err("db_tx_failed"))?;
    tx.execute("UPDATE semesters SET is_current = 0 WHERE is_current <> 0", [])
        .map_err(db_err("db_update_failed"))?;
    let changed = tx
        .execute("UPDATE semesters SET is_current = 1 WHERE id = ?", [&id])
        .map_err(db_err("db_update_failed"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("semester not found"));
    }
    tx.commit().map_err(db_err("db_commit_failed"))?;
    tracing::info!(semester_id = %id, "current semester changed");
    Ok(json!({ "ok": true }))
}

fn semesters_current(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let current = conn
        .query_row(
            &format!(
                "SELECT {} FROM semesters WHERE is_current = 1 LIMIT 1",
                SEMESTER_COLUMNS
            ),
            [],
            semester_from_row,
        )
        .optional()
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "semester": current }))
}

fn handle_semesters_list(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, semesters_list)
}

fn handle_semesters_create(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, semesters_create)
}

fn handle_semesters_set_current(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, semesters_set_current)
}

fn handle_semesters_current(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, semesters_current)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.list" => Some(handle_semesters_list(state, req)),
        "semesters.create" => Some(handle_semesters_create(state, req)),
        "semesters.setCurrent" => Some(handle_semesters_set_current(state, req)),
        "semesters.current" => Some(handle_semesters_current(state, req)),
        _ => None,
    }
}
