use super::setup::{calendar_history_limit, CALENDAR_HISTORY_LIMIT_MAX};
use super::{db_conn, optional_str, required_str};
use crate::db;
use crate::events::{self, CalendarEvent};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn required_text(params: &serde_json::Value) -> Result<&str, HandlerErr> {
    params
        .get("text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing text"))
}

fn calendar_parse(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let text = required_text(params)?;
    let parsed = events::parse_events_detailed(text);
    Ok(json!({
        "stage": parsed.stage,
        "events": parsed.events,
    }))
}

fn calendar_save(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let text = required_text(params)?;
    if text.trim().is_empty() {
        return Err(HandlerErr::bad_params("text is empty"));
    }

    let parsed = events::parse_events(text);
    let content = events::calendar_content(text, parsed.as_deref())
        .map_err(|e| HandlerErr::new("internal", e.to_string()))?;
    let id = Uuid::new_v4().to_string();
    let created_at = db::now_rfc3339();
    conn.execute(
        "INSERT INTO student_calendars(id, student_id, content, created_at) VALUES(?, ?, ?, ?)",
        (&id, &student_id, &content, &created_at),
    )
    .map_err(|e| HandlerErr::insert(e, "student_calendars"))?;

    info!(
        student_id = %student_id,
        events = parsed.as_ref().map(|e| e.len()).unwrap_or(0),
        "calendar saved"
    );
    Ok(json!({
        "id": id,
        "createdAt": created_at,
        "structured": parsed.is_some(),
        "events": parsed,
    }))
}

struct StoredCalendar {
    id: String,
    student_id: String,
    content: String,
    created_at: String,
}

impl StoredCalendar {
    fn to_json(&self) -> serde_json::Value {
        let events: Option<Vec<CalendarEvent>> = events::parse_events(&self.content);
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "createdAt": self.created_at,
            "content": self.content,
            "events": events,
        })
    }
}

fn stored_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StoredCalendar> {
    Ok(StoredCalendar {
        id: r.get(0)?,
        student_id: r.get(1)?,
        content: r.get(2)?,
        created_at: r.get(3)?,
    })
}

fn calendar_latest(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // Without a student the newest calendar overall is returned (parent view).
    let student_id = optional_str(params, "studentId");
    let latest = conn
        .query_row(
            "SELECT id, student_id, content, created_at FROM student_calendars
             WHERE (?1 IS NULL OR student_id = ?1)
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1",
            [student_id.as_deref()],
            stored_from_row,
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(json!({ "calendar": latest.map(|c| c.to_json()) }))
}

fn calendar_history(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let limit = match params.get("limit") {
        None | Some(serde_json::Value::Null) => calendar_history_limit(conn),
        Some(v) => match v.as_i64() {
            Some(n) if (1..=CALENDAR_HISTORY_LIMIT_MAX).contains(&n) => n,
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "limit must be in 1..={}",
                    CALENDAR_HISTORY_LIMIT_MAX
                )))
            }
        },
    };

    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, content, created_at FROM student_calendars
             WHERE student_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map((&student_id, limit), stored_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    let calendars: Vec<serde_json::Value> = rows.iter().map(StoredCalendar::to_json).collect();
    Ok(json!({ "calendars": calendars }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "calendar.parse" => calendar_parse(&req.params),
        "calendar.save" => db_conn(state).and_then(|conn| calendar_save(conn, &req.params)),
        "calendar.latest" => db_conn(state).and_then(|conn| calendar_latest(conn, &req.params)),
        "calendar.history" => db_conn(state).and_then(|conn| calendar_history(conn, &req.params)),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
