use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "mindstride.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

pub fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student',
            student_id TEXT NOT NULL DEFAULT '',
            class TEXT NOT NULL DEFAULT '',
            semester TEXT,
            cgpa TEXT,
            updated_at TEXT
        )",
        [],
    )?;
    // Workspaces created before the cached CGPA existed lack these columns.
    ensure_profiles_cgpa_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_profiles_role_class ON profiles(role, class)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES profiles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_user ON courses(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_marks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            semester INTEGER NOT NULL,
            internal1 REAL NOT NULL,
            internal2 REAL NOT NULL,
            assignment REAL NOT NULL,
            see REAL NOT NULL,
            total_internal_50 REAL NOT NULL,
            see_50 REAL NOT NULL,
            total_100 REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES profiles(id),
            UNIQUE(student_id, subject_name, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_marks_student_sem ON subject_marks(student_id, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_calendars(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_calendars_student ON student_calendars(student_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cgpa_outbox(
            student_id TEXT PRIMARY KEY,
            cgpa TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_profiles_cgpa_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "profiles", "semester")? {
        conn.execute("ALTER TABLE profiles ADD COLUMN semester TEXT", [])?;
    }
    if !table_has_column(conn, "profiles", "cgpa")? {
        conn.execute("ALTER TABLE profiles ADD COLUMN cgpa TEXT", [])?;
    }
    if !table_has_column(conn, "profiles", "updated_at")? {
        conn.execute("ALTER TABLE profiles ADD COLUMN updated_at TEXT", [])?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        ensure_schema(&conn).expect("first");
        ensure_schema(&conn).expect("second");
        assert!(table_has_column(&conn, "subject_marks", "total_100").expect("pragma"));
    }

    #[test]
    fn old_profiles_table_gains_cgpa_columns() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute(
            "CREATE TABLE profiles(id TEXT PRIMARY KEY, full_name TEXT NOT NULL, role TEXT NOT NULL, student_id TEXT NOT NULL, class TEXT NOT NULL)",
            [],
        )
        .expect("legacy table");
        ensure_schema(&conn).expect("migrate");
        assert!(table_has_column(&conn, "profiles", "cgpa").expect("pragma"));
        assert!(table_has_column(&conn, "profiles", "semester").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip() {
        let conn = Connection::open_in_memory().expect("open");
        ensure_schema(&conn).expect("schema");
        assert_eq!(settings_get_json(&conn, "setup.marks").expect("get"), None);
        let v = serde_json::json!({ "strictNumbers": true });
        settings_set_json(&conn, "setup.marks", &v).expect("set");
        settings_set_json(&conn, "setup.marks", &v).expect("set again");
        assert_eq!(settings_get_json(&conn, "setup.marks").expect("get"), Some(v));
    }
}
