use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Native identifier of the document store: 24 lowercase hex characters,
/// a 4-byte seconds timestamp followed by an 8-byte sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub const LEN: usize = 24;

    pub fn generate(now: DateTime<Utc>) -> Self {
        let seconds = now.timestamp().clamp(0, u32::MAX as i64) as u32;
        let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let salt = (std::process::id() as u64) << 40;
        Self(format!("{seconds:08x}{:016x}", salt ^ sequence))
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.len() != Self::LEN || !trimmed.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(format!("'{trimmed}' is not a {}-character hex id", Self::LEN));
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub carry_over: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.text, "task.text")?;
        if let Some(due) = &self.due {
            validate_hhmm(due, "task.due")?;
        }
        if let Some(date) = &self.date {
            validate_date(date, "task.date")?;
        }
        Ok(())
    }

    /// The calendar day the task belongs to. Absent or unparseable dates
    /// yield `None`, which callers read as "today".
    pub fn scheduled_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub source_subject: Option<String>,
    #[serde(default)]
    pub source_from: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub source_account: Option<String>,
    #[serde(default)]
    pub source_email_ts: Option<String>,
    #[serde(rename = "addedToCalendar", default)]
    pub added_to_calendar: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ExtractedTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "extracted.id")?;
        validate_non_empty(&self.title, "extracted.title")?;
        if let Some(date) = &self.date {
            validate_date(date, "extracted.date")?;
        }
        if let Some(time) = &self.time {
            validate_hhmm(time, "extracted.time")?;
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err("extracted.confidence must be between 0 and 1".to_string());
            }
        }
        Ok(())
    }

    /// `(source_account, source_email_ts)` when both are present.
    pub fn source_key(&self) -> Option<(&str, &str)> {
        match (self.source_account.as_deref(), self.source_email_ts.as_deref()) {
            (Some(account), Some(ts)) => Some((account, ts)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceAccount {
    pub email: String,
    #[serde(default)]
    pub last_email_ts: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "note.id")?;
        validate_non_empty(&self.title, "note.title")?;
        if self.updated_at < self.created_at {
            return Err("note.updated_at must be >= note.created_at".to_string());
        }
        Ok(())
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let (Some(hour_str), Some(minute_str), None) = (split.next(), split.next(), split.next())
    else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if hour_str.len() != 2 || minute_str.len() != 2 {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

pub(crate) fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    parse_date(value).ok_or_else(|| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}
