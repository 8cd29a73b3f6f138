use super::{db_conn, optional_str, required_str};
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct StudentProfile {
    id: String,
    full_name: String,
    role: String,
    student_id: String,
    class: String,
    semester: Option<String>,
    cgpa: Option<String>,
}

const PROFILE_COLUMNS: &str = "id, full_name, role, student_id, class, semester, cgpa";

fn profile_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentProfile> {
    Ok(StudentProfile {
        id: r.get(0)?,
        full_name: r.get(1)?,
        role: r.get(2)?,
        student_id: r.get(3)?,
        class: r.get(4)?,
        semester: r.get(5)?,
        cgpa: r.get(6)?,
    })
}

/// Semester and CGPA arrive as numbers or strings from the UI; both are stored as text.
fn optional_text(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be string or number", key))),
    }
}

fn students_upsert(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let full_name = required_str(params, "fullName")?;
    let roll_no = optional_str(params, "studentId").unwrap_or_default();
    let class = optional_str(params, "class").unwrap_or_default();
    let role = optional_str(params, "role").unwrap_or_else(|| "student".to_string());
    if !matches!(role.as_str(), "student" | "teacher" | "parent") {
        return Err(HandlerErr::bad_params("role must be one of: student, teacher, parent")
            .with_details(json!({ "role": role })));
    }
    let semester = optional_text(params, "semester")?;
    let cgpa = optional_text(params, "cgpa")?;
    let id = optional_str(params, "id").unwrap_or_else(|| Uuid::new_v4().to_string());

    conn.execute(
        "INSERT INTO profiles(id, full_name, role, student_id, class, semester, cgpa, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           full_name = excluded.full_name,
           role = excluded.role,
           student_id = excluded.student_id,
           class = excluded.class,
           semester = COALESCE(excluded.semester, profiles.semester),
           cgpa = COALESCE(excluded.cgpa, profiles.cgpa),
           updated_at = excluded.updated_at",
        rusqlite::params![id, full_name, role, roll_no, class, semester, cgpa, db::now_rfc3339()],
    )
    .map_err(|e| HandlerErr::insert(e, "profiles"))?;

    Ok(json!({ "id": id }))
}

fn matches_query(p: &StudentProfile, lowered: &str) -> bool {
    p.full_name.to_lowercase().contains(lowered)
        || p.student_id.to_lowercase().contains(lowered)
        || p.class.to_lowercase().contains(lowered)
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM profiles WHERE role = 'student' ORDER BY class, full_name",
        PROFILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([], profile_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let students: Vec<StudentProfile> = match optional_str(params, "query") {
        Some(q) => {
            let lowered = q.to_lowercase();
            students.into_iter().filter(|p| matches_query(p, &lowered)).collect()
        }
        None => students,
    };
    Ok(json!({ "students": students }))
}

fn students_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = required_str(params, "id")?;
    let sql = format!("SELECT {} FROM profiles WHERE id = ?", PROFILE_COLUMNS);
    let profile = conn
        .query_row(&sql, [&id], profile_from_row)
        .optional()
        .map_err(HandlerErr::query)?;
    match profile {
        Some(p) => Ok(json!({ "student": p })),
        None => Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "id": id }))),
    }
}

fn profile_exists(conn: &Connection, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM profiles WHERE id = ?", [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::query)
}

fn courses_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let name = required_str(params, "name")?;
    if !profile_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found")
            .with_details(json!({ "studentId": student_id })));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, user_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&id, &student_id, &name, db::now_rfc3339()),
    )
    .map_err(|e| HandlerErr::insert(e, "courses"))?;
    Ok(json!({ "courseId": id }))
}

fn courses_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, created_at FROM courses
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    let courses = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handler: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr> =
        match req.method.as_str() {
            "students.upsert" => students_upsert,
            "students.list" => students_list,
            "students.get" => students_get,
            "courses.add" => courses_add,
            "courses.list" => courses_list,
            _ => return None,
        };
    let result = db_conn(state).and_then(|conn| handler(conn, &req.params));
    Some(respond(&req.id, result))
}
