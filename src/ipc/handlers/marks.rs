use super::{db_conn, optional_str};
use super::setup::marks_number_policy;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::marks::{self, MarksError, MarksForm};
use crate::scoring::{self, NumberPolicy};
use rusqlite::Connection;
use serde_json::json;

impl From<MarksError> for HandlerErr {
    fn from(e: MarksError) -> Self {
        let details = e.details();
        HandlerErr {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

fn parse_form(params: &serde_json::Value) -> Result<MarksForm, HandlerErr> {
    serde_json::from_value(params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid marks form: {}", e)))
}

fn marks_preview(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let form = parse_form(params)?;
    // Preview works without a workspace; policy falls back to lenient.
    let policy = state
        .db
        .as_ref()
        .map(marks_number_policy)
        .unwrap_or(NumberPolicy::Lenient);
    let preview = marks::preview_marks(&form, policy)?;
    serde_json::to_value(preview).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn marks_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let form = parse_form(params)?;
    let outcome = marks::save_marks(conn, &form, marks_number_policy(conn))?;
    serde_json::to_value(outcome).map_err(|e| HandlerErr::new("internal", e.to_string()))
}

fn marks_sync_cgpa(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let summary = marks::retry_pending_cgpa(conn)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "synced": summary.synced, "pending": summary.pending }))
}

fn marks_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = optional_str(params, "studentId");
    let semester = match params.get("semester") {
        Some(v) => scoring::semester_from_value(v).map_err(HandlerErr::bad_params)?,
        None => None,
    };
    let rows = marks::list_marks(conn, student_id.as_deref(), semester).map_err(HandlerErr::query)?;
    Ok(json!({ "marks": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.preview" => marks_preview(state, &req.params),
        "marks.save" => db_conn(state).and_then(|conn| marks_save(conn, &req.params)),
        "marks.syncCgpa" => db_conn(state).and_then(marks_sync_cgpa),
        "marks.list" => db_conn(state).and_then(|conn| marks_list(conn, &req.params)),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
