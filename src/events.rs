use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Field separator of the extraction grammar
/// `DD/MM/YYYY (Ddd) – HH:MM–HH:MM – ExamType – Code – Title`.
pub const EVENT_DELIMITER: char = '–';
const TITLE_JOINER: &str = " – ";
const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub date: String,
    pub time: String,
    pub exam_type: String,
    pub code: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseStage {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "lines")]
    Lines,
    #[serde(rename = "none")]
    Unparsed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEvents {
    pub stage: ParseStage,
    /// `None` means "show the raw text", never an error.
    pub events: Option<Vec<CalendarEvent>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotAnObject,
    MissingField(&'static str),
    NotAString(&'static str),
    EmptyField(&'static str),
}

/// Schema check result for one element of a JSON array.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Valid(CalendarEvent),
    Invalid(Rejection),
}

fn string_field(
    obj: &serde_json::Map<String, Value>,
    key: &'static str,
) -> Result<String, Rejection> {
    match obj.get(key) {
        None => Err(Rejection::MissingField(key)),
        Some(Value::String(s)) if s.is_empty() => Err(Rejection::EmptyField(key)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Rejection::NotAString(key)),
    }
}

fn event_from_object(item: &Value) -> Result<CalendarEvent, Rejection> {
    let obj = item.as_object().ok_or(Rejection::NotAnObject)?;
    Ok(CalendarEvent {
        date: string_field(obj, "date")?,
        time: string_field(obj, "time")?,
        exam_type: string_field(obj, "exam_type")?,
        code: string_field(obj, "code")?,
        title: string_field(obj, "title")?,
    })
}

pub fn validate_candidate(item: &Value) -> Candidate {
    match event_from_object(item) {
        Ok(ev) => Candidate::Valid(ev),
        Err(reason) => Candidate::Invalid(reason),
    }
}

/// Removes a surrounding ```` ```lang ```` fence, if the text starts with one.
pub fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix(FENCE) else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .unwrap_or(rest);
    let rest = rest.trim_end();
    rest.strip_suffix(FENCE).unwrap_or(rest).trim()
}

/// `None` when the body is not a JSON array at all.
fn parse_json_stage(body: &str) -> Option<Vec<CalendarEvent>> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    let Value::Array(items) = parsed else {
        debug!("extraction JSON is not an array");
        return None;
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match validate_candidate(item) {
            Candidate::Valid(ev) => out.push(ev),
            Candidate::Invalid(reason) => {
                debug!(index = idx, ?reason, "dropping calendar candidate");
            }
        }
    }
    Some(out)
}

/// Splits on en-dashes that touch whitespace, leaving `10:00–11:30` intact.
fn split_spaced(line: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, &(pos, c)) in chars.iter().enumerate() {
        if c != EVENT_DELIMITER {
            continue;
        }
        let before = i > 0 && chars[i - 1].1.is_whitespace();
        let after = chars.get(i + 1).map(|(_, n)| n.is_whitespace()).unwrap_or(false);
        if before || after {
            parts.push(&line[start..pos]);
            start = pos + c.len_utf8();
        }
    }
    parts.push(&line[start..]);
    parts
}

pub fn parse_event_line(line: &str) -> Option<CalendarEvent> {
    if !line.contains(EVENT_DELIMITER) {
        return None;
    }

    let mut parts: Vec<&str> = split_spaced(line).into_iter().map(str::trim).collect();
    if parts.len() < 5 {
        parts = line.split(EVENT_DELIMITER).map(str::trim).collect();
    }
    while parts.len() > 5 && parts.last().map(|p| p.is_empty()).unwrap_or(false) {
        parts.pop();
    }
    if parts.len() < 5 || parts[..5].iter().any(|p| p.is_empty()) {
        return None;
    }

    Some(CalendarEvent {
        date: parts[0].to_string(),
        time: parts[1].to_string(),
        exam_type: parts[2].to_string(),
        code: parts[3].to_string(),
        title: parts[4..].join(TITLE_JOINER),
    })
}

pub fn parse_event_lines(text: &str) -> Vec<CalendarEvent> {
    text.lines().filter_map(parse_event_line).collect()
}

/// JSON array first, line grammar second.
pub fn parse_events_detailed(raw: &str) -> ParsedEvents {
    let body = strip_fence(raw);

    match parse_json_stage(body) {
        Some(events) if !events.is_empty() => {
            debug!(count = events.len(), "calendar text parsed as JSON");
            return ParsedEvents {
                stage: ParseStage::Json,
                events: Some(events),
            };
        }
        Some(_) => debug!("JSON array held no valid events; trying lines"),
        None => {}
    }

    let events = parse_event_lines(body);
    if events.is_empty() {
        debug!("calendar text left unstructured");
        return ParsedEvents {
            stage: ParseStage::Unparsed,
            events: None,
        };
    }
    debug!(count = events.len(), "calendar text parsed line by line");
    ParsedEvents {
        stage: ParseStage::Lines,
        events: Some(events),
    }
}

pub fn parse_events(raw: &str) -> Option<Vec<CalendarEvent>> {
    parse_events_detailed(raw).events
}

/// Stored form of a parsed calendar: the JSON array when structured, raw text otherwise.
pub fn calendar_content(raw: &str, events: Option<&[CalendarEvent]>) -> serde_json::Result<String> {
    match events {
        Some(evs) if !evs.is_empty() => serde_json::to_string(evs),
        _ => Ok(raw.to_string()),
    }
}
