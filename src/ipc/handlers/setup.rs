use crate::calc::GradeScale;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::GradePolicy;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
}

impl SetupSection {
    const ALL: [SetupSection; 1] = [SetupSection::Grading];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "scale": GradeScale::default().as_f64(),
            "gradePolicy": GradePolicy::default().as_str(),
        }),
    }
}

fn parse_scale(v: &Value, key: &str) -> Result<GradeScale, String> {
    match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} must be 4.0 or 5.0", key))
            .and_then(GradeScale::try_from),
        Value::String(s) => s.parse::<GradeScale>(),
        _ => Err(format!("{} must be 4.0 or 5.0", key)),
    }
}

fn parse_policy(v: &Value, key: &str) -> Result<GradePolicy, String> {
    v.as_str()
        .and_then(GradePolicy::parse)
        .ok_or_else(|| format!("{} must be one of: upsert, insert_only", key))
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let Some(obj) = current.as_object_mut() else {
        return Err("section is not an object".into());
    };
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "scale" => {
                    obj.insert(k.clone(), Value::from(parse_scale(v, k)?.as_f64()));
                }
                "gradePolicy" => {
                    obj.insert(k.clone(), Value::String(parse_policy(v, k)?.as_str().into()));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring malformed saved settings");
            }
        }
    }
    Ok(current)
}

/// Workspace grading defaults; per-call parameters override them.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradingSettings {
    pub scale: GradeScale,
    pub grade_policy: GradePolicy,
}

pub fn load_grading(conn: &rusqlite::Connection) -> anyhow::Result<GradingSettings> {
    let v = load_section(conn, SetupSection::Grading)?;
    let defaults = GradingSettings::default();
    Ok(GradingSettings {
        scale: v
            .get("scale")
            .and_then(|s| parse_scale(s, "scale").ok())
            .unwrap_or(defaults.scale),
        grade_policy: v
            .get("gradePolicy")
            .and_then(|p| parse_policy(p, "gradePolicy").ok())
            .unwrap_or(defaults.grade_policy),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn grading_defaults_apply_until_saved() {
        let conn = mem();
        assert_eq!(load_grading(&conn).expect("load"), GradingSettings::default());

        db::settings_set_json(&conn, "setup.grading", &json!({ "scale": 5, "gradePolicy": "insert_only" }))
            .expect("save");
        let g = load_grading(&conn).expect("load");
        assert_eq!(g.scale, GradeScale::FivePoint);
        assert_eq!(g.grade_policy, GradePolicy::InsertOnly);
    }

    #[test]
    fn malformed_saved_values_fall_back() {
        let conn = mem();
        db::settings_set_json(&conn, "setup.grading", &json!({ "scale": 7 })).expect("save");
        assert_eq!(load_grading(&conn).expect("load").scale, GradeScale::FourPoint);
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let mut current = default_section(SetupSection::Grading);
        let patch = json!({ "curve": true });
        let msg = merge_section_patch(
            SetupSection::Grading,
            &mut current,
            patch.as_object().expect("object"),
        )
        .expect_err("unknown field");
        assert_eq!(msg, "unknown grading field: curve");
    }
}
