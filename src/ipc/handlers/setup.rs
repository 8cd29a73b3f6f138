use super::db_conn;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::scoring::NumberPolicy;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::warn;

pub const CALENDAR_HISTORY_LIMIT_MAX: i64 = 200;

#[derive(Clone, Copy)]
enum SetupSection {
    Marks,
    Calendar,
}

impl SetupSection {
    const ALL: [SetupSection; 2] = [SetupSection::Marks, SetupSection::Calendar];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "marks" => Some(Self::Marks),
            "calendar" => Some(Self::Calendar),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Marks => "marks",
            Self::Calendar => "calendar",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Marks => "setup.marks",
            Self::Calendar => "setup.calendar",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Marks => json!({
            "strictNumbers": false
        }),
        SetupSection::Calendar => json!({
            "historyLimit": 20
        }),
    }
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
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Marks => match k.as_str() {
                "strictNumbers" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown marks field: {}", k)),
            },
            SetupSection::Calendar => match k.as_str() {
                "historyLimit" => {
                    let n = parse_i64_range(v, k, 1, CALENDAR_HISTORY_LIMIT_MAX)?;
                    obj.insert(k.clone(), json!(n));
                }
                _ => return Err(format!("unknown calendar field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Fields after a malformed saved value keep their defaults.
            if let Err(msg) = merge_section_patch(section, &mut current, saved_obj) {
                warn!(section = section.name(), error = %msg, "ignoring saved setup value");
            }
        }
    }
    Ok(current)
}

/// How the marks handlers read non-numeric strings.
pub fn marks_number_policy(conn: &Connection) -> NumberPolicy {
    let strict = load_section(conn, SetupSection::Marks)
        .ok()
        .and_then(|v| v.get("strictNumbers").and_then(|b| b.as_bool()))
        .unwrap_or(false);
    if strict {
        NumberPolicy::Strict
    } else {
        NumberPolicy::Lenient
    }
}

pub fn calendar_history_limit(conn: &Connection) -> i64 {
    load_section(conn, SetupSection::Calendar)
        .ok()
        .and_then(|v| v.get("historyLimit").and_then(|n| n.as_i64()))
        .unwrap_or(20)
}

fn setup_get(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut out = Map::new();
    for section in SetupSection::ALL {
        let v = load_section(conn, section).map_err(HandlerErr::query)?;
        out.insert(section.name().to_string(), v);
    }
    Ok(Value::Object(out))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = params
        .get("section")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing section"))?;
    let section = SetupSection::parse(section_raw)
        .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let mut current = load_section(conn, section).map_err(HandlerErr::query)?;
    merge_section_patch(section, &mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    let mut out = Map::new();
    out.insert("ok".to_string(), Value::Bool(true));
    out.insert(section.name().to_string(), current);
    Ok(Value::Object(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => db_conn(state).and_then(setup_get),
        "setup.update" => db_conn(state).and_then(|conn| setup_update(conn, &req.params)),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
