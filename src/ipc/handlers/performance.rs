use super::{db_conn, optional_str};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::performance::{performance_score, PerformanceInputs};
use crate::scoring::{coerce_number, parse_finite};
use rusqlite::OptionalExtension;
use serde_json::json;

/// Cached CGPA of a student, when `cgpa` is not passed explicitly.
fn profile_cgpa(state: &AppState, student_id: &str) -> Result<f64, HandlerErr> {
    let conn = db_conn(state)?;
    let cgpa: Option<Option<String>> = conn
        .query_row("SELECT cgpa FROM profiles WHERE id = ?", [student_id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    match cgpa {
        Some(raw) => Ok(raw.as_deref().and_then(parse_finite).unwrap_or(0.0)),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id }))),
    }
}

fn score(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cgpa = match (params.get("cgpa"), optional_str(params, "studentId")) {
        (Some(v), _) if !v.is_null() => coerce_number(Some(v)),
        (_, Some(student_id)) => profile_cgpa(state, &student_id)?,
        _ => 0.0,
    };
    let inputs = PerformanceInputs {
        cgpa,
        attendance: coerce_number(params.get("attendance")),
        desktop_study_hours: coerce_number(params.get("desktopStudyHours")),
        desktop_entertainment_hours: coerce_number(params.get("desktopEntertainmentHours")),
        phone_hours: coerce_number(params.get("phoneHours")),
    };
    serde_json::to_value(performance_score(&inputs))
        .map_err(|e| HandlerErr::new("internal", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "performance.score" => Some(respond(&req.id, score(state, &req.params))),
        _ => None,
    }
}
