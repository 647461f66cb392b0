use crate::auth::Session;
use crate::db;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_str, get_paging, get_required_str, with_db, with_session,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// `all`, a role (`admin`/`admins`, `student`/`students`), `user:<username>`
/// or a bare username. Stored as `all`, `admin`, `student` or `user:<username>`.
fn parse_audience(raw: &str) -> Option<String> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "all" => return Some("all".to_string()),
        "admin" | "admins" => return Some("admin".to_string()),
        "student" | "students" => return Some("student".to_string()),
        _ => {}
    }
    let user = raw.strip_prefix("user:").map(str::trim).unwrap_or(raw);
    if user.is_empty() || user.contains(char::is_whitespace) {
        return None;
    }
    Some(format!("user:{}", user))
}

pub(crate) fn notify(
    conn: &Connection,
    kind: &str,
    title: &str,
    message: &str,
    severity: Severity,
    audience: &str,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notifications(id, kind, title, message, severity, audience, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&id, kind, title, message, severity.as_str(), audience, db::now_rfc3339()),
    )?;
    tracing::debug!(notification_id = %id, kind, audience, "notification created");
    Ok(id)
}

const VISIBLE: &str = "n.audience IN ('all', ?1, 'user:' || ?2)";

fn notifications_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let message = get_required_str(params, "message")?;
    let severity = match get_opt_str(params, "severity")? {
        Some(s) => Severity::parse(&s)
            .ok_or_else(|| HandlerErr::bad_params("severity must be one of: info, warning, error"))?,
        None => Severity::Info,
    };
    let audience = match (get_opt_str(params, "recipient")?, get_opt_str(params, "audience")?) {
        (Some(user), _) => format!("user:{}", user),
        (None, Some(a)) => parse_audience(&a).ok_or_else(|| {
            HandlerErr::bad_params("audience must be all, admins, students or a username")
        })?,
        (None, None) => "all".to_string(),
    };
    let id = notify(conn, "manual", &title, &message, severity, &audience)
        .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "id": id, "audience": audience }))
}

fn notifications_list(conn: &Connection, session: &Session, params: &Value) -> Result<Value, HandlerErr> {
    let unread_only = get_opt_bool(params, "unreadOnly")?.unwrap_or(false);
    let (limit, offset) = get_paging(params)?;
    let sql = format!(
        "SELECT n.id, n.kind, n.title, n.message, n.severity, n.audience, n.created_at,
                r.read_at
         FROM notifications n
         LEFT JOIN notification_reads r ON r.notification_id = n.id AND r.username = ?2
         WHERE {} AND (?3 = 0 OR r.read_at IS NULL)
         ORDER BY n.created_at DESC, n.id
         LIMIT ?4 OFFSET ?5",
        VISIBLE
    );
    let mut stmt = conn.prepare(&sql).map_err(db_err("db_query_failed"))?;
    let rows = stmt
        .query_map(
            (
                session.role.as_str(),
                &session.username,
                unread_only as i64,
                limit,
                offset,
            ),
            |r| {
                let id: String = r.get(0)?;
                let kind: String = r.get(1)?;
                let title: String = r.get(2)?;
                let message: String = r.get(3)?;
                let severity: String = r.get(4)?;
                let audience: String = r.get(5)?;
                let created_at: String = r.get(6)?;
                let read_at: Option<String> = r.get(7)?;
                Ok(json!({
                    "id": id,
                    "kind": kind,
                    "title": title,
                    "message": message,
                    "severity": severity,
                    "audience": audience,
                    "createdAt": created_at,
                    "read": read_at.is_some(),
                    "readAt": read_at,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err("db_query_failed"))?;
    Ok(json!({ "notifications": rows }))
}

fn unread_count(conn: &Connection, session: &Session) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COUNT(*) FROM notifications n
         WHERE {} AND NOT EXISTS (
            SELECT 1 FROM notification_reads r
            WHERE r.notification_id = n.id AND r.username = ?2
         )",
        VISIBLE
    );
    conn.query_row(&sql, (session.role.as_str(), &session.username), |r| r.get(0))
        .map_err(db_err("db_query_failed"))
}

fn notifications_mark_read(conn: &Connection, session: &Session, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let sql = format!("SELECT 1 FROM notifications n WHERE {} AND n.id = ?3", VISIBLE);
    let visible: Option<i64> = conn
        .query_row(&sql, (session.role.as_str(), &session.username, &id), |r| r.get(0))
        .optional()
        .map_err(db_err("db_query_failed"))?;
    if visible.is_none() {
        return Err(HandlerErr::not_found("notification not found"));
    }
    conn.execute(
        "INSERT OR IGNORE INTO notification_reads(notification_id, username, read_at) VALUES(?, ?, ?)",
        (&id, &session.username, db::now_rfc3339()),
    )
    .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "ok": true }))
}

fn notifications_mark_all_read(conn: &Connection, session: &Session) -> Result<Value, HandlerErr> {
    let sql = format!(
        "INSERT OR IGNORE INTO notification_reads(notification_id, username, read_at)
         SELECT n.id, ?2, ?3 FROM notifications n WHERE {}",
        VISIBLE
    );
    let marked = conn
        .execute(&sql, (session.role.as_str(), &session.username, db::now_rfc3339()))
        .map_err(db_err("db_insert_failed"))?;
    Ok(json!({ "marked": marked }))
}

fn handle_notifications_create(state: &mut AppState, req: &Request) -> Value {
    with_db(state, req, notifications_create)
}

fn handle_notifications_list(state: &mut AppState, req: &Request) -> Value {
    with_session(state, req, notifications_list)
}

fn handle_notifications_unread_count(state: &mut AppState, req: &Request) -> Value {
    with_session(state, req, |conn, session, _| {
        Ok(json!({ "count": unread_count(conn, session)? }))
    })
}

fn handle_notifications_mark_read(state: &mut AppState, req: &Request) -> Value {
    with_session(state, req, notifications_mark_read)
}

fn handle_notifications_mark_all_read(state: &mut AppState, req: &Request) -> Value {
    with_session(state, req, |conn, session, _| notifications_mark_all_read(conn, session))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notifications.create" => Some(handle_notifications_create(state, req)),
        "notifications.list" => Some(handle_notifications_list(state, req)),
        "notifications.unreadCount" => Some(handle_notifications_unread_count(state, req)),
        "notifications.markRead" => Some(handle_notifications_mark_read(state, req)),
        "notifications.markAllRead" => Some(handle_notifications_mark_all_read(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn audience_controls_visibility_and_reads_are_per_user() {
        let conn = mem();
        notify(&conn, "manual", "All", "to everyone", Severity::Info, "all").expect("n1");
        notify(&conn, "import", "Admins", "admins only", Severity::Warning, "admin").expect("n2");
        notify(&conn, "manual", "Ama", "just ama", Severity::Info, "user:UG001").expect("n3");

        let admin = Session::new("registrar", Role::Admin);
        let ama = Session::new("UG001", Role::Student);
        let kojo = Session::new("UG002", Role::Student);
        assert_eq!(unread_count(&conn, &admin).expect("admin"), 2);
        assert_eq!(unread_count(&conn, &ama).expect("ama"), 2);
        assert_eq!(unread_count(&conn, &kojo).expect("kojo"), 1);

        let marked = notifications_mark_all_read(&conn, &ama).expect("mark");
        assert_eq!(marked["marked"], 2);
        assert_eq!(unread_count(&conn, &ama).expect("ama"), 0);
        assert_eq!(unread_count(&conn, &kojo).expect("kojo"), 1);
    }

    #[test]
    fn hidden_notifications_cannot_be_marked() {
        let conn = mem();
        let id = notify(&conn, "manual", "Ama", "just ama", Severity::Info, "user:UG001").expect("n");
        let kojo = Session::new("UG002", Role::Student);
        let e = notifications_mark_read(&conn, &kojo, &json!({ "id": id })).expect_err("hidden");
        assert_eq!(e.code, "not_found");
    }

    #[test]
    fn audience_strings_are_checked() {
        assert_eq!(parse_audience("admin").as_deref(), Some("admin"));
        assert_eq!(parse_audience("Admins").as_deref(), Some("admin"));
        assert_eq!(parse_audience("students").as_deref(), Some("student"));
        assert_eq!(parse_audience("user: UG001").as_deref(), Some("user:UG001"));
        assert_eq!(parse_audience("UG001").as_deref(), Some("user:UG001"));
        assert_eq!(parse_audience("user:"), None);
        assert_eq!(parse_audience("   "), None);
        assert_eq!(parse_audience("two words"), None);
    }

    #[test]
    fn plural_audiences_reach_the_matching_role() {
        let conn = mem();
        let created =
            notifications_create(&conn, &json!({ "title": "Results", "message": "out", "audience": "admins" }))
                .expect("admins");
        assert_eq!(created["audience"], "admin");
        notifications_create(&conn, &json!({ "title": "Fees", "message": "due", "audience": "students" }))
            .expect("students");
        notifications_create(&conn, &json!({ "title": "Hi", "message": "ama", "audience": "UG001" }))
            .expect("user");

        let admin = Session::new("registrar", Role::Admin);
        let listed = notifications_list(&conn, &admin, &json!({})).expect("list");
        let titles: Vec<&str> = listed["notifications"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|n| n["title"].as_str())
            .collect();
        assert_eq!(titles, vec!["Results"]);

        let ama = Session::new("UG001", Role::Student);
        assert_eq!(unread_count(&conn, &ama).expect("ama"), 2);
    }
}
