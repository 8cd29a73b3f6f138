use crate::db;
use crate::scoring::{self, DerivedMarks, MarkInputs, NumberPolicy};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MarksError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },
    #[error("student not found")]
    StudentNotFound { student_id: String },
    #[error("{context}: {source}")]
    Persistence {
        context: &'static str,
        code: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl MarksError {
    fn validation(message: impl Into<String>, details: Option<Value>) -> Self {
        Self::Validation {
            message: message.into(),
            details,
        }
    }

    fn query(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Persistence {
            context,
            code: "db_query_failed",
            source,
        }
    }

    fn write(context: &'static str, source: rusqlite::Error) -> Self {
        Self::Persistence {
            context,
            code: "db_insert_failed",
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "bad_params",
            Self::StudentNotFound { .. } => "not_found",
            Self::Persistence { code, .. } => *code,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. } => details.clone(),
            Self::StudentNotFound { student_id } => Some(json!({ "studentId": student_id })),
            Self::Persistence { .. } => None,
        }
    }
}

/// Marks form as submitted by the teacher view. Numeric fields stay raw JSON so
/// the configured [`NumberPolicy`] decides how strings are read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksForm {
    #[serde(default)]
    pub student_id: String,
    #[serde(default, alias = "subjectName")]
    pub subject: String,
    #[serde(default)]
    pub semester: Option<Value>,
    #[serde(default)]
    pub internal1: Option<Value>,
    #[serde(default)]
    pub internal2: Option<Value>,
    #[serde(default)]
    pub assignment: Option<Value>,
    #[serde(default)]
    pub see: Option<Value>,
    #[serde(default)]
    pub previous_cgpa: Option<Value>,
}

impl MarksForm {
    pub fn mark_inputs(&self, policy: NumberPolicy) -> Result<MarkInputs, MarksError> {
        let read = |field: &'static str, v: &Option<Value>| {
            scoring::read_number(v.as_ref(), policy).map_err(|bad| {
                MarksError::validation(
                    format!("{} must be numeric", field),
                    Some(json!({ "field": field, "value": bad.raw })),
                )
            })
        };
        Ok(MarkInputs {
            internal1: read("internal1", &self.internal1)?,
            internal2: read("internal2", &self.internal2)?,
            assignment: read("assignment", &self.assignment)?,
            see: read("see", &self.see)?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarksPreview {
    #[serde(flatten)]
    pub derived: DerivedMarks,
    pub subject_sgpa: f64,
    pub previous_cgpa: f64,
    pub new_cgpa: f64,
}

/// Live totals for the entry form; touches no storage.
pub fn preview_marks(form: &MarksForm, policy: NumberPolicy) -> Result<MarksPreview, MarksError> {
    let derived = scoring::derive_marks(&form.mark_inputs(policy)?);
    let previous_cgpa = scoring::resolve_previous_cgpa(form.previous_cgpa.as_ref(), None);
    let subject_sgpa = derived.subject_sgpa();
    Ok(MarksPreview {
        derived,
        subject_sgpa,
        previous_cgpa,
        new_cgpa: scoring::next_cgpa(previous_cgpa, subject_sgpa),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub student_id: String,
    pub subject_name: String,
    pub semester: i64,
    #[serde(flatten)]
    pub derived: DerivedMarks,
    pub semester_sgpa: f64,
    pub subjects_counted: usize,
    pub previous_cgpa: f64,
    pub new_cgpa: f64,
    /// False when the profile write failed and the value sits in the outbox.
    pub cgpa_synced: bool,
}

struct ProfileSnapshot {
    semester: Option<String>,
    cgpa: Option<String>,
}

fn load_profile(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<ProfileSnapshot>, MarksError> {
    conn.query_row(
        "SELECT semester, cgpa FROM profiles WHERE id = ?",
        [student_id],
        |r| {
            Ok(ProfileSnapshot {
                semester: r.get(0)?,
                cgpa: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(|e| MarksError::query("load profile", e))
}

fn upsert_subject_mark(
    conn: &Connection,
    student_id: &str,
    subject_name: &str,
    semester: i64,
    inputs: &MarkInputs,
    derived: &DerivedMarks,
) -> Result<(), MarksError> {
    conn.execute(
        "INSERT INTO subject_marks(
            id, student_id, subject_name, semester,
            internal1, internal2, assignment, see,
            total_internal_50, see_50, total_100, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_name, semester) DO UPDATE SET
           internal1 = excluded.internal1,
           internal2 = excluded.internal2,
           assignment = excluded.assignment,
           see = excluded.see,
           total_internal_50 = excluded.total_internal_50,
           see_50 = excluded.see_50,
           total_100 = excluded.total_100,
           updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            student_id,
            subject_name,
            semester,
            inputs.internal1,
            inputs.internal2,
            inputs.assignment,
            inputs.see,
            derived.internal_total50,
            derived.see_converted50,
            derived.total100,
            db::now_rfc3339(),
        ],
    )
    .map_err(|e| MarksError::write("upsert subject mark", e))?;
    Ok(())
}

fn semester_totals(
    conn: &Connection,
    student_id: &str,
    semester: i64,
) -> rusqlite::Result<Vec<f64>> {
    let mut stmt = conn.prepare(
        "SELECT total_100 FROM subject_marks WHERE student_id = ? AND semester = ?",
    )?;
    let rows = stmt
        .query_map((student_id, semester), |r| r.get::<_, Option<f64>>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// `Ok(false)` when no profile row matched.
fn write_profile_cgpa(conn: &Connection, student_id: &str, cgpa: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE profiles SET cgpa = ?, updated_at = ? WHERE id = ?",
        (cgpa, db::now_rfc3339(), student_id),
    )?;
    Ok(changed > 0)
}

fn park_cgpa(
    conn: &Connection,
    student_id: &str,
    cgpa: &str,
    reason: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO cgpa_outbox(student_id, cgpa, attempts, last_error, updated_at)
         VALUES(?, ?, 1, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET
           cgpa = excluded.cgpa,
           attempts = cgpa_outbox.attempts + 1,
           last_error = excluded.last_error,
           updated_at = excluded.updated_at",
        (student_id, cgpa, reason, db::now_rfc3339()),
    )?;
    Ok(())
}

fn clear_parked(conn: &Connection, student_id: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM cgpa_outbox WHERE student_id = ?", [student_id])?;
    Ok(())
}

/// Second saga step. Never fails the save; a failed write is parked for retry.
fn sync_cgpa_after_save(conn: &Connection, student_id: &str, cgpa: &str) -> bool {
    let failure = match write_profile_cgpa(conn, student_id, cgpa) {
        Ok(true) => {
            if let Err(e) = clear_parked(conn, student_id) {
                warn!(student_id, error = %e, "could not clear stale cgpa outbox row");
            }
            return true;
        }
        Ok(false) => "profile row missing".to_string(),
        Err(e) => e.to_string(),
    };

    warn!(student_id, cgpa, error = %failure, "profile cgpa update failed; parked for retry");
    if let Err(e) = park_cgpa(conn, student_id, cgpa, &failure) {
        warn!(student_id, error = %e, "could not park cgpa in outbox");
    }
    false
}

pub fn save_marks(
    conn: &Connection,
    form: &MarksForm,
    policy: NumberPolicy,
) -> Result<SaveOutcome, MarksError> {
    let student_id = form.student_id.trim();
    if student_id.is_empty() {
        return Err(MarksError::validation("missing studentId", None));
    }
    let subject_name = form.subject.trim();
    if subject_name.is_empty() {
        return Err(MarksError::validation("subject name is required", None));
    }

    let Some(profile) = load_profile(conn, student_id)? else {
        return Err(MarksError::StudentNotFound {
            student_id: student_id.to_string(),
        });
    };
    let semester = scoring::resolve_semester(form.semester.as_ref(), profile.semester.as_deref())
        .map_err(|msg| MarksError::validation(msg, None))?;
    let inputs = form.mark_inputs(policy)?;
    let derived = scoring::derive_marks(&inputs);
    let previous_cgpa =
        scoring::resolve_previous_cgpa(form.previous_cgpa.as_ref(), profile.cgpa.as_deref());

    upsert_subject_mark(conn, student_id, subject_name, semester, &inputs, &derived)?;
    info!(
        student_id,
        subject = subject_name,
        semester,
        total100 = derived.total100,
        "subject marks saved"
    );

    let totals = match semester_totals(conn, student_id, semester) {
        Ok(t) => t,
        Err(e) => {
            warn!(
                student_id,
                semester,
                error = %e,
                "semester totals unavailable; using this subject only"
            );
            vec![derived.total100]
        }
    };
    let semester_sgpa = scoring::semester_sgpa(&totals).unwrap_or_else(|| derived.subject_sgpa());
    let new_cgpa = scoring::next_cgpa(previous_cgpa, semester_sgpa);
    let cgpa_synced = sync_cgpa_after_save(conn, student_id, &scoring::format_cgpa(new_cgpa));

    Ok(SaveOutcome {
        student_id: student_id.to_string(),
        subject_name: subject_name.to_string(),
        semester,
        derived,
        semester_sgpa,
        subjects_counted: totals.len(),
        previous_cgpa,
        new_cgpa,
        cgpa_synced,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CgpaSyncSummary {
    pub synced: usize,
    pub pending: usize,
}

/// Retries every parked profile CGPA write. Safe to call repeatedly.
pub fn retry_pending_cgpa(conn: &Connection) -> anyhow::Result<CgpaSyncSummary> {
    let mut stmt = conn.prepare("SELECT student_id, cgpa FROM cgpa_outbox ORDER BY updated_at")?;
    let parked = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut summary = CgpaSyncSummary {
        synced: 0,
        pending: 0,
    };
    for (student_id, cgpa) in parked {
        match write_profile_cgpa(conn, &student_id, &cgpa) {
            Ok(true) => {
                clear_parked(conn, &student_id)?;
                summary.synced += 1;
            }
            Ok(false) => {
                warn!(student_id = %student_id, "dropping parked cgpa for missing profile");
                clear_parked(conn, &student_id)?;
            }
            Err(e) => {
                conn.execute(
                    "UPDATE cgpa_outbox SET attempts = attempts + 1, last_error = ?, updated_at = ?
                     WHERE student_id = ?",
                    (e.to_string(), db::now_rfc3339(), &student_id),
                )?;
                summary.pending += 1;
            }
        }
    }
    if summary.synced > 0 || summary.pending > 0 {
        info!(synced = summary.synced, pending = summary.pending, "cgpa outbox drained");
    }
    Ok(summary)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectMarkRow {
    pub id: String,
    pub student_id: String,
    pub subject_name: String,
    pub semester: i64,
    pub internal1: f64,
    pub internal2: f64,
    pub assignment: f64,
    pub see: f64,
    pub total_internal50: f64,
    pub see50: f64,
    pub total100: f64,
    pub updated_at: Option<String>,
}

pub fn list_marks(
    conn: &Connection,
    student_id: Option<&str>,
    semester: Option<i64>,
) -> rusqlite::Result<Vec<SubjectMarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, subject_name, semester, internal1, internal2, assignment, see,
                total_internal_50, see_50, total_100, updated_at
         FROM subject_marks
         WHERE (?1 IS NULL OR student_id = ?1) AND (?2 IS NULL OR semester = ?2)
         ORDER BY student_id, semester, subject_name",
    )?;
    let rows = stmt
        .query_map((student_id, semester), |r| {
            Ok(SubjectMarkRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                subject_name: r.get(2)?,
                semester: r.get(3)?,
                internal1: r.get(4)?,
                internal2: r.get(5)?,
                assignment: r.get(6)?,
                see: r.get(7)?,
                total_internal50: r.get(8)?,
                see50: r.get(9)?,
                total100: r.get(10)?,
                updated_at: r.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
