use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use crate::markers::MarkersSettings;
use serde_json::{json, Map, Value};

const MAX_BATCH_CEILING: i64 = 20_000;

#[derive(Clone, Copy)]
enum SetupSection {
    Markers,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "markers" => Some(Self::Markers),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Markers => "setup.markers",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Markers => {
            let d = MarkersSettings::default();
            json!({
                "maxBatchAssociations": d.max_batch_associations,
                "showEmptyCriteria": d.show_empty_criteria,
                "auditDeniedAccess": d.audit_denied_access
            })
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Markers => match k.as_str() {
                "maxBatchAssociations" => {
                    obj.insert(
                        k.clone(),
                        Value::from(parse_i64_range(v, k, 1, MAX_BATCH_CEILING)?),
                    );
                }
                "showEmptyCriteria" | "auditDeniedAccess" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown markers field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(key = section.key(), error = %e, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Typed view of the `markers` section with defaults applied.
pub fn load_markers_settings(conn: &rusqlite::Connection) -> anyhow::Result<MarkersSettings> {
    let section = load_section(conn, SetupSection::Markers)?;
    let d = MarkersSettings::default();
    Ok(MarkersSettings {
        max_batch_associations: section
            .get("maxBatchAssociations")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(d.max_batch_associations),
        show_empty_criteria: section
            .get("showEmptyCriteria")
            .and_then(|v| v.as_bool())
            .unwrap_or(d.show_empty_criteria),
        audit_denied_access: section
            .get("auditDeniedAccess")
            .and_then(|v| v.as_bool())
            .unwrap_or(d.audit_denied_access),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let markers = match load_section(conn, SetupSection::Markers) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "markers": markers }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
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
    tracing::info!(key = section.key(), "setup updated");
    ok(&req.id, json!({ "ok": true, "markers": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
