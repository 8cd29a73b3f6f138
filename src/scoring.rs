use serde::Serialize;
use serde_json::Value;

pub const INTERNAL_RAW_OUT_OF: f64 = 100.0;
pub const INTERNAL_CONVERTED_MAX: f64 = 25.0;
pub const ASSIGNMENT_MAX: f64 = 25.0;
pub const INTERNAL_TOTAL_MAX: f64 = 50.0;
pub const SEE_OUT_OF: f64 = 100.0;
pub const SEE_CONVERTED_MAX: f64 = 50.0;
pub const TOTAL_MAX: f64 = 100.0;
pub const CGPA_MAX: f64 = 10.0;

/// Semester used when neither the request nor the stored profile names one.
pub const DEFAULT_SEMESTER: i64 = 1;

/// Clamp into `[lo, hi]`. NaN counts as 0 before clamping.
pub fn bounded(lo: f64, hi: f64, x: f64) -> f64 {
    let x = if x.is_nan() { 0.0 } else { x };
    x.clamp(lo, hi)
}

/// 2-decimal rounding used for the cached CGPA.
pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// CGPA as persisted on the profile row. Ties round up, not to even.
pub fn format_cgpa(x: f64) -> String {
    format!("{:.2}", round_2(bounded(0.0, CGPA_MAX, x)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberPolicy {
    /// Blank and non-numeric input reads as 0.
    Lenient,
    /// Blank input reads as 0; non-numeric strings are rejected.
    Strict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NonNumeric {
    pub raw: String,
}

/// Trimmed parse of a stored numeric string; non-finite values count as absent.
pub fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Reads a form value (JSON number or string) as a mark.
pub fn read_number(v: Option<&Value>, policy: NumberPolicy) -> Result<f64, NonNumeric> {
    let Some(v) = v else { return Ok(0.0) };
    match v {
        Value::Null => Ok(0.0),
        Value::Number(n) => Ok(n.as_f64().filter(|x| x.is_finite()).unwrap_or(0.0)),
        Value::String(s) if s.trim().is_empty() => Ok(0.0),
        Value::String(s) => match parse_finite(s) {
            Some(x) => Ok(x),
            None if policy == NumberPolicy::Lenient => Ok(0.0),
            None => Err(NonNumeric { raw: s.clone() }),
        },
        _ if policy == NumberPolicy::Lenient => Ok(0.0),
        other => Err(NonNumeric {
            raw: other.to_string(),
        }),
    }
}

/// Lenient read: anything that is not a finite number becomes 0.
pub fn coerce_number(v: Option<&Value>) -> f64 {
    read_number(v, NumberPolicy::Lenient).unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarkInputs {
    pub internal1: f64,
    pub internal2: f64,
    pub assignment: f64,
    pub see: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMarks {
    pub internal_raw: f64,
    pub internal_converted25: f64,
    pub assignment25: f64,
    pub internal_total50: f64,
    pub see_converted50: f64,
    pub total100: f64,
}

impl DerivedMarks {
    /// SGPA contribution of this subject alone.
    pub fn subject_sgpa(&self) -> f64 {
        self.total100 / 10.0
    }
}

pub fn derive_marks(m: &MarkInputs) -> DerivedMarks {
    let internal_raw = m.internal1 + m.internal2;
    let internal_converted25 = bounded(
        0.0,
        INTERNAL_CONVERTED_MAX,
        internal_raw / INTERNAL_RAW_OUT_OF * INTERNAL_CONVERTED_MAX,
    );
    let assignment25 = bounded(0.0, ASSIGNMENT_MAX, m.assignment);
    let internal_total50 = bounded(
        0.0,
        INTERNAL_TOTAL_MAX,
        internal_converted25 + assignment25,
    );
    let see_converted50 = bounded(0.0, SEE_CONVERTED_MAX, m.see / SEE_OUT_OF * SEE_CONVERTED_MAX);
    let total100 = bounded(0.0, TOTAL_MAX, internal_total50 + see_converted50);

    DerivedMarks {
        internal_raw,
        internal_converted25,
        assignment25,
        internal_total50,
        see_converted50,
        total100,
    }
}

/// Mean subject total divided by 10. `None` when the semester has no rows.
pub fn semester_sgpa(totals: &[f64]) -> Option<f64> {
    if totals.is_empty() {
        return None;
    }
    let sum: f64 = totals.iter().map(|t| bounded(0.0, TOTAL_MAX, *t)).sum();
    Some(sum / totals.len() as f64 / 10.0)
}

/// Two-point running average; a non-positive previous CGPA means "first semester".
pub fn next_cgpa(previous_cgpa: f64, semester_sgpa: f64) -> f64 {
    let previous = bounded(0.0, CGPA_MAX, previous_cgpa);
    let current = bounded(0.0, CGPA_MAX, semester_sgpa);
    if previous > 0.0 {
        (previous + current) / 2.0
    } else {
        current
    }
}

/// Previous CGPA for a save: a non-blank override wins, then the cached profile value.
pub fn resolve_previous_cgpa(override_value: Option<&Value>, profile_cgpa: Option<&str>) -> f64 {
    let overridden = match override_value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(coerce_number(Some(v))),
    };
    let raw = overridden
        .or_else(|| profile_cgpa.and_then(parse_finite))
        .unwrap_or(0.0);
    bounded(0.0, CGPA_MAX, raw)
}

/// `Ok(None)` when the value is absent or blank.
pub fn semester_from_value(v: &Value) -> Result<Option<i64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(format!("semester must be a positive integer, got {:?}", s)),
        },
        Value::Number(n) => {
            let as_int = n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64));
            match as_int {
                Some(v) if v > 0 => Ok(Some(v)),
                _ => Err(format!("semester must be a positive integer, got {}", n)),
            }
        }
        other => Err(format!("semester must be a positive integer, got {}", other)),
    }
}

/// Request value, then the profile's stored semester, then [`DEFAULT_SEMESTER`].
pub fn resolve_semester(
    explicit: Option<&Value>,
    profile_semester: Option<&str>,
) -> Result<i64, String> {
    if let Some(v) = explicit {
        if let Some(n) = semester_from_value(v)? {
            return Ok(n);
        }
    }
    if let Some(s) = profile_semester {
        if let Some(n) = semester_from_value(&Value::String(s.to_string()))? {
            return Ok(n);
        }
    }
    Ok(DEFAULT_SEMESTER)
}
