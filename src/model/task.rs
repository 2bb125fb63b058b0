use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix of ids handed out locally before the server assigns a real one
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// Server-assigned task identity (or a `tmp-` placeholder for unsaved tasks)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        TaskId(id.into())
    }

    /// A fresh client-side id, replaced once the server answers a create
    pub fn temporary() -> Self {
        TaskId(format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        TaskId(s.to_string())
    }
}

/// Error type for `HHMM` parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeError {
    #[error("time must be four digits in HHMM form, got {0:?}")]
    Format(String),
    #[error("time out of range: {0}")]
    OutOfRange(String),
}

/// A time of day in 24-hour `HHMM` form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime {
    hour: u8,
    minute: u8,
}

const LAST_MINUTE_OF_DAY: u32 = 23 * 60 + 59;

impl ClockTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, TimeError> {
        if hour > 23 || minute > 59 {
            return Err(TimeError::OutOfRange(format!("{:02}{:02}", hour, minute)));
        }
        Ok(ClockTime { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }

    pub fn minutes_since_midnight(self) -> u32 {
        self.hour as u32 * 60 + self.minute as u32
    }

    /// Add minutes, saturating at 23:59 (a time never wraps into the next day)
    pub fn plus_minutes(self, minutes: u32) -> Self {
        let total = self
            .minutes_since_midnight()
            .saturating_add(minutes)
            .min(LAST_MINUTE_OF_DAY);
        ClockTime {
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        }
    }
}

impl FromStr for ClockTime {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeError::Format(s.to_string()));
        }
        // Four ASCII digits, so both halves parse
        let hour: u8 = s[..2].parse().map_err(|_| TimeError::Format(s.to_string()))?;
        let minute: u8 = s[2..].parse().map_err(|_| TimeError::Format(s.to_string()))?;
        ClockTime::new(hour, minute)
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}{:02}", self.hour, self.minute)
    }
}

impl Serialize for ClockTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The server stores an untimed task's time as `""` or `null`; both mean "no time".
fn optional_time<'de, D: Deserializer<'de>>(de: D) -> Result<Option<ClockTime>, D::Error> {
    let raw: Option<String> = Option::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn patch_time<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Option<ClockTime>>, D::Error> {
    optional_time(de).map(Some)
}

fn patch_value<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

/// A task as the server and every cache entry see it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
    /// `None` means backlog
    #[serde(default)]
    pub due: Option<NaiveDate>,
    #[serde(default, deserialize_with = "optional_time")]
    pub start_time: Option<ClockTime>,
    #[serde(default, deserialize_with = "optional_time")]
    pub end_time: Option<ClockTime>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Task {
            id,
            name: name.into(),
            notes: String::new(),
            due: None,
            start_time: None,
            end_time: None,
            is_complete: false,
            is_archived: false,
            created_at,
        }
    }

    /// A not-yet-saved task with a temporary id
    pub fn draft(name: impl Into<String>) -> Self {
        Task::new(TaskId::temporary(), name, Utc::now())
    }

    pub fn with_due(mut self, due: Option<NaiveDate>) -> Self {
        self.due = due;
        self
    }

    pub fn with_times(mut self, start: Option<ClockTime>, end: Option<ClockTime>) -> Self {
        self.start_time = start;
        self.end_time = end;
        self.normalize_times();
        self
    }

    /// A task is timed iff it has a start time
    pub fn is_timed(&self) -> bool {
        self.start_time.is_some()
    }

    /// Enforce the time invariants: no end without a start, a missing end
    /// equals the start, and the end is never before the start.
    pub fn normalize_times(&mut self) {
        match self.start_time {
            None => self.end_time = None,
            Some(start) => match self.end_time {
                Some(end) if end >= start => {}
                _ => self.end_time = Some(start),
            },
        }
    }

    /// True when both tasks occupy the same ordering slot (day and times)
    pub fn same_slot(&self, other: &Task) -> bool {
        self.due == other.due
            && self.start_time == other.start_time
            && self.end_time == other.end_time
    }

    /// Identity used by list views; a re-created task with a reused id still renders fresh
    pub fn render_key(&self) -> String {
        format!("{}{}", self.id, self.created_at.timestamp_millis())
    }

    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
        if let Some(start) = patch.start_time {
            self.start_time = start;
        }
        if let Some(end) = patch.end_time {
            self.end_time = end;
        }
        if let Some(done) = patch.is_complete {
            self.is_complete = done;
        }
        if let Some(archived) = patch.is_archived {
            self.is_archived = archived;
        }
        self.normalize_times();
    }

    pub fn patched(&self, patch: &TaskPatch) -> Task {
        let mut next = self.clone();
        next.apply_patch(patch);
        next
    }
}

/// A partial update. Nullable fields nest an `Option` so that
/// `Some(None)` ("clear it") differs from `None` ("leave it").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "patch_value")]
    pub due: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "patch_time")]
    pub start_time: Option<Option<ClockTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "patch_time")]
    pub end_time: Option<Option<ClockTime>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_complete: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
}

impl TaskPatch {
    pub fn times(start: Option<ClockTime>, end: Option<ClockTime>) -> Self {
        TaskPatch {
            start_time: Some(start),
            end_time: Some(end),
            ..Default::default()
        }
    }

    pub fn due(due: Option<NaiveDate>) -> Self {
        TaskPatch {
            due: Some(due),
            ..Default::default()
        }
    }

    pub fn complete(done: bool) -> Self {
        TaskPatch {
            is_complete: Some(done),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == TaskPatch::default()
    }
}
