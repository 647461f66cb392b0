use crate::db;
use crate::import::{bulk_import, ImportOptions, SqliteGateway};
use crate::ipc::handlers::notifications::{notify, Severity};
use crate::ipc::handlers::setup::load_grading;
use crate::ipc::helpers::{
    db_err, get_opt_scale, get_opt_str, get_paging, get_required_str, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{GradePolicy, ImportSummary};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::Path;
use uuid::Uuid;

fn import_options(conn: &Connection, params: &Value) -> Result<ImportOptions, HandlerErr> {
    let defaults = load_grading(conn).map_err(db_err("db_query_failed"))?;
    let scale = get_opt_scale(params, "scale")?.unwrap_or(defaults.scale);
    let grade_policy = match get_opt_str(params, "gradePolicy")? {
        Some(raw) => GradePolicy::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("gradePolicy must be one of: upsert, insert_only")
        })?,
        None => defaults.grade_policy,
    };
    Ok(ImportOptions {
        scale,
        grade_policy,
    })
}

/// Audit row plus an admin notification. Neither may change the outcome
/// already returned by the import.
fn record_run(
    conn: &Connection,
    source: &str,
    started_at: &str,
    summary: &ImportSummary,
) -> Option<String> {
    let id = Uuid::new_v4().to_string();
    let saved = conn.execute(
        "INSERT INTO import_runs(id, source_path, total, successful, skipped, message, started_at, finished_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            source,
            summary.total as i64,
            summary.successful as i64,
            summary.skipped as i64,
            &summary.message,
            started_at,
            db::now_rfc3339(),
        ),
    );
    if let Err(e) = saved {
        tracing::warn!(error = %e, "could not record import run");
        return None;
    }

    let severity = if summary.successful == 0 && !summary.errors.is_empty() {
        Severity::Error
    } else if summary.skipped > 0 {
        Severity::Warning
    } else {
        Severity::Info
    };
    let text = format!(
        "{} {} of {} rows imported, {} skipped.",
        summary.message, summary.successful, summary.total, summary.skipped
    );
    if let Err(e) = notify(conn, "import", "Bulk import finished", &text, severity, "admin") {
        tracing::warn!(error = %e, "could not notify admins of import");
    }
    Some(id)
}

fn import_bulk(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let path = get_required_str(params, "path")?;
    let options = import_options(conn, params)?;
    let started_at = db::now_rfc3339();

    let summary = bulk_import(Path::new(&path), options, || {
        SqliteGateway::begin(conn, options.grade_policy)
    });
    let run_id = record_run(conn, &path, &started_at, &summary);

    let mut out = serde_json::to_value(&summary).map_err(db_err("internal_error"))?;
    out["runId"] = json!(run_id);
    Ok(out)
}

fn import_history(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (limit, offset) = get_paging(params)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, source_path, total, successful, skipped, message, started_at, finished_at
             FROM import_runs
             ORDER BY started_at DESC, id
             LIMIT ? OFFSET ?",
        )
        .map_err(db_err("db_query_failed"))?;
    let runs = stmt
        .query_map((limit, offset), |r| {
            let id: String = r.get(0)?;
            let source: String = r.get(1)?;
            let total: i64 = r.get(2)?;
            let successful: i64 = r.get(3)?;
            let skipped: i64 = r.get(4)?;
            let message: String = r.get(5)?;
            let started_at: String = r.get(6)?;
            let finished_at: String = r.get(7)?;
            Ok(json!({
                "id": id,
                "sourcePath": source,
                "total": total,
                "successful": successful,
                "skipped": skipped,
                "message": message,
                "startedAt": started_at,
                "finishedAt": finished_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "runs": runs }))
}

fn handle_import_bulk(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, import_bulk)
}

fn handle_import_history(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, import_history)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.bulk" => Some(handle_import_bulk(state, req)),
        "import.history" => Some(handle_import_history(state, req)),
        _ => None,
    }
}
