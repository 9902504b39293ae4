//! Activity-log normalization. `/alllogs` has no fixed row shape, so each display
//! field is read through a chain of aliases and defaults.

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::{Map, Value};

use super::records::text_of;

const CONTAINER_KEYS: &[&str] = &["data", "logs", "items", "results"];

const ID_KEYS: &[&str] = &["id", "log_id", "uuid"];
const ACTOR_KEYS: &[&str] = &["user_name", "username", "actor", "performed_by", "email"];
const ACTION_KEYS: &[&str] = &["action", "event", "activity", "type"];
const RESOURCE_KEYS: &[&str] = &["resource", "module", "subject", "entity"];
const MESSAGE_KEYS: &[&str] = &["message", "description", "details", "note"];
const IP_KEYS: &[&str] = &["ip", "ip_address", "ipAddress"];
const LEVEL_KEYS: &[&str] = &["level", "severity", "status"];
const LOG_NAME_KEYS: &[&str] = &["log_name", "logName"];
const TIMESTAMP_KEYS: &[&str] = &["created_at", "createdAt", "timestamp", "logged_at", "date"];

pub const PLACEHOLDER: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Success,
    Info,
    Other,
}

impl Severity {
    pub fn classify(level: &str) -> Self {
        let l = level.to_lowercase();
        if l.contains("error") || l.contains("fail") { Severity::Error }
        else if l.contains("warn") { Severity::Warning }
        else if l.contains("success") { Severity::Success }
        else if l.contains("info") { Severity::Info }
        else { Severity::Other }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Backend id, empty when the row had none.
    pub raw_id: String,
    pub actor: String,
    /// Actor email shown under the name; may be empty.
    pub actor_meta: String,
    pub action: String,
    pub resource: String,
    pub message: String,
    pub ip: String,
    pub level: String,
    pub log_name: String,
    pub timestamp: String,
}

// First alias present and not null wins, even when its text is blank.
fn first<'a>(row: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| row.get(*k)).find(|v| !v.is_null())
}

fn field(row: &Map<String, Value>, keys: &[&str], default: &str) -> String {
    let text = first(row, keys).map(text_of).unwrap_or_default();
    let text = text.trim();
    if text.is_empty() { default.to_string() } else { text.to_string() }
}

impl LogEntry {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let user = row.get("user").and_then(|u| u.as_object());
        let user_field = |k: &str| user.and_then(|u| u.get(k)).filter(|v| !v.is_null());

        let actor = match user_field("name") {
            Some(v) => {
                let t = text_of(v);
                if t.trim().is_empty() { "System".to_string() } else { t.trim().to_string() }
            }
            None => field(row, ACTOR_KEYS, "System"),
        };
        let actor_meta = user_field("email").or_else(|| row.get("email").filter(|v| !v.is_null())).map(text_of).unwrap_or_default();

        Self {
            raw_id: field(row, ID_KEYS, ""),
            actor,
            actor_meta: actor_meta.trim().to_string(),
            action: field(row, ACTION_KEYS, "Activity"),
            resource: field(row, RESOURCE_KEYS, PLACEHOLDER),
            message: field(row, MESSAGE_KEYS, PLACEHOLDER),
            ip: field(row, IP_KEYS, PLACEHOLDER),
            level: field(row, LEVEL_KEYS, PLACEHOLDER),
            log_name: field(row, LOG_NAME_KEYS, PLACEHOLDER),
            timestamp: first(row, TIMESTAMP_KEYS).map(text_of).filter(|t| !t.is_empty()).unwrap_or_else(|| PLACEHOLDER.to_string()),
        }
    }

    /// The backend id, or the 1-based position in the listing.
    pub fn display_id(&self, index: usize) -> String {
        if self.raw_id.is_empty() { (index + 1).to_string() } else { self.raw_id.clone() }
    }

    pub fn severity(&self) -> Severity { Severity::classify(&self.level) }

    pub fn formatted_time(&self) -> String { format_timestamp(&self.timestamp) }

    fn haystack(&self) -> String {
        [&self.raw_id, &self.actor, &self.action, &self.resource, &self.message, &self.ip, &self.level, &self.log_name]
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

/// Find the row array in a `/alllogs` payload. Anything unrecognised is an empty list.
pub fn normalize_logs(payload: &Value) -> Vec<LogEntry> {
    let rows: &[Value] = match payload {
        Value::Array(rows) => rows.as_slice(),
        Value::Object(top) => match CONTAINER_KEYS.iter().filter_map(|k| top.get(*k)).find(|v| !v.is_null()) {
            Some(Value::Array(rows)) => rows.as_slice(),
            Some(Value::Object(inner)) => match inner.get("data") {
                Some(Value::Array(rows)) => rows.as_slice(),
                _ => &[],
            },
            _ => &[],
        },
        _ => &[],
    };
    rows.iter().filter_map(|r| r.as_object()).map(LogEntry::from_row).collect()
}

/// Local display form for a timestamp; unparseable input is shown as-is.
pub fn format_timestamp(raw: &str) -> String {
    if raw.is_empty() || raw == PLACEHOLDER {
        return PLACEHOLDER.to_string();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string();
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format("%Y-%m-%d %H:%M:%S").to_string();
        }
    }
    raw.to_string()
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Free text matched against every display field.
    pub query: String,
    /// Exact level (case-insensitive); `None` or `"all"` matches every row.
    pub level: Option<String>,
    pub log_name: Option<String>,
}

fn selector(v: &Option<String>) -> Option<String> {
    v.as_deref().map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty() && s != "all")
}

impl LogFilter {
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(level) = selector(&self.level) {
            if entry.level.to_lowercase() != level { return false; }
        }
        if let Some(name) = selector(&self.log_name) {
            if entry.log_name.to_lowercase() != name { return false; }
        }
        let q = self.query.trim().to_lowercase();
        q.is_empty() || entry.haystack().contains(&q)
    }

    pub fn apply<'a>(&self, entries: &'a [LogEntry]) -> Vec<&'a LogEntry> {
        entries.iter().filter(|e| self.matches(e)).collect()
    }
}

fn distinct<'a, F: Fn(&'a LogEntry) -> &'a str>(entries: &'a [LogEntry], pick: F) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for e in entries {
        let v = pick(e).trim();
        if !v.is_empty() && v != PLACEHOLDER && !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

/// Levels present in the data, in first-seen order, for a filter dropdown.
pub fn level_options(entries: &[LogEntry]) -> Vec<String> { distinct(entries, |e| e.level.as_str()) }

pub fn log_name_options(entries: &[LogEntry]) -> Vec<String> { distinct(entries, |e| e.log_name.as_str()) }
