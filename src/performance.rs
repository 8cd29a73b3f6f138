use serde::Serialize;

const CGPA_WEIGHT: f64 = 0.35;
const ATTENDANCE_WEIGHT: f64 = 0.25;
const STUDY_WEIGHT: f64 = 0.20;
const LEISURE_WEIGHT: f64 = 0.20;

/// Daily study hours that earn a full study score.
const STUDY_TARGET_HOURS: f64 = 4.0;
/// Leisure at or below this many hours a day is not penalised.
const LEISURE_FREE_HOURS: f64 = 1.0;
/// Leisure at or above this many hours a day scores 0.
const LEISURE_ZERO_HOURS: f64 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerformanceInputs {
    pub cgpa: f64,
    pub attendance: f64,
    pub desktop_study_hours: f64,
    pub desktop_entertainment_hours: f64,
    pub phone_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponents {
    pub cgpa_score: f64,
    pub attendance_score: f64,
    pub study_score: f64,
    pub entertainment_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceScore {
    pub score: f64,
    pub components: ScoreComponents,
}

fn non_negative(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.max(0.0)
    }
}

fn clamp_or_zero(lo: f64, hi: f64, x: f64) -> f64 {
    if x.is_nan() {
        lo
    } else {
        x.clamp(lo, hi)
    }
}

/// `Int(10*x + 0.5) / 10`, i.e. half-up to one decimal.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Piecewise-linear leisure curve: 100 up to 1h, 0 from 6h, linear between.
pub fn entertainment_score(total_leisure_hours: f64) -> f64 {
    let t = non_negative(total_leisure_hours);
    if t <= LEISURE_FREE_HOURS {
        100.0
    } else if t >= LEISURE_ZERO_HOURS {
        0.0
    } else {
        100.0 - ((t - LEISURE_FREE_HOURS) / (LEISURE_ZERO_HOURS - LEISURE_FREE_HOURS)) * 100.0
    }
}

pub fn score_components(input: &PerformanceInputs) -> ScoreComponents {
    let cgpa_score = clamp_or_zero(0.0, 10.0, input.cgpa) / 10.0 * 100.0;
    let attendance_score = clamp_or_zero(0.0, 100.0, input.attendance);
    let study_score =
        (non_negative(input.desktop_study_hours) / STUDY_TARGET_HOURS * 100.0).min(100.0);
    let total_leisure =
        non_negative(input.desktop_entertainment_hours) + non_negative(input.phone_hours);

    ScoreComponents {
        cgpa_score,
        attendance_score,
        study_score,
        entertainment_score: entertainment_score(total_leisure),
    }
}

/// Dashboard index in `[0, 100]`, one decimal. Never fails; inputs are clamped.
pub fn performance_score(input: &PerformanceInputs) -> PerformanceScore {
    let c = score_components(input);
    let weighted = c.cgpa_score * CGPA_WEIGHT
        + c.attendance_score * ATTENDANCE_WEIGHT
        + c.study_score * STUDY_WEIGHT
        + c.entertainment_score * LEISURE_WEIGHT;

    PerformanceScore {
        score: round_off_1_decimal(weighted).clamp(0.0, 100.0),
        components: c,
    }
}
