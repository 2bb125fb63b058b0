use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::task::Task;

pub const INBOX_PATH: &str = "/private/task/inbox";
pub const ARCHIVE_PATH: &str = "/private/task/archive";
pub const DAY_BUCKET_PATH: &str = "/private/task/inbox/prosys";
pub const CALENDAR_PATH: &str = "/private/task/inbox/gcal";

/// `due` parameter value for the backlog (no due date)
const BACKLOG_PARAM: &str = "backlog";

/// Error type for descriptor parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryParseError {
    #[error("query path must start with '/': {0:?}")]
    MissingPath(String),
    #[error("malformed query parameter {0:?}")]
    MalformedParam(String),
}

/// Canonical key of one server view: a path plus filter parameters.
///
/// Parameters live in a `BTreeMap`, so two descriptors built with the same
/// parameters in any order compare, hash and print identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryDescriptor {
    path: String,
    params: BTreeMap<String, String>,
}

/// The known server views a descriptor can name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryView {
    Inbox,
    Archive,
    DayBucket {
        due: Option<NaiveDate>,
        is_timed: bool,
    },
    Calendar {
        due: Option<NaiveDate>,
    },
    Other,
}

impl QueryDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        QueryDescriptor {
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// All unarchived tasks, every day plus backlog
    pub fn inbox() -> Self {
        QueryDescriptor::new(INBOX_PATH)
    }

    pub fn archive() -> Self {
        QueryDescriptor::new(ARCHIVE_PATH)
    }

    /// One day's timed or untimed tasks
    pub fn day_bucket(due: Option<NaiveDate>, is_timed: bool) -> Self {
        QueryDescriptor::new(DAY_BUCKET_PATH)
            .with_param("due", due_param(due))
            .with_param("isTimed", is_timed)
    }

    /// Calendar-provider events for one day (read-only mirror)
    pub fn calendar(due: Option<NaiveDate>) -> Self {
        QueryDescriptor::new(CALENDAR_PATH).with_param("due", due_param(due))
    }

    /// The day bucket a task currently belongs to
    pub fn bucket_of(task: &Task) -> Self {
        QueryDescriptor::day_bucket(task.due, task.is_timed())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }

    pub fn view(&self) -> QueryView {
        match self.path.as_str() {
            INBOX_PATH => QueryView::Inbox,
            ARCHIVE_PATH => QueryView::Archive,
            DAY_BUCKET_PATH => match (self.due_param(), self.param("isTimed")) {
                (Some(due), Some("true")) => QueryView::DayBucket {
                    due,
                    is_timed: true,
                },
                (Some(due), Some("false")) => QueryView::DayBucket {
                    due,
                    is_timed: false,
                },
                _ => QueryView::Other,
            },
            CALENDAR_PATH => match self.due_param() {
                Some(due) => QueryView::Calendar { due },
                None => QueryView::Other,
            },
            _ => QueryView::Other,
        }
    }

    /// Server-side filter for this view. Calendar and unknown views never
    /// match locally stored tasks.
    pub fn matches(&self, task: &Task) -> bool {
        match self.view() {
            QueryView::Inbox => !task.is_archived && !task.is_complete,
            QueryView::Archive => task.is_archived,
            QueryView::DayBucket { due, is_timed } => {
                !task.is_archived
                    && !task.is_complete
                    && task.due == due
                    && task.is_timed() == is_timed
            }
            QueryView::Calendar { .. } | QueryView::Other => false,
        }
    }

    /// `Some(None)` for the backlog, `None` when the parameter is missing or malformed
    fn due_param(&self) -> Option<Option<NaiveDate>> {
        match self.param("due")? {
            BACKLOG_PARAM => Some(None),
            s => NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(Some),
        }
    }
}

fn due_param(due: Option<NaiveDate>) -> String {
    match due {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => BACKLOG_PARAM.to_string(),
    }
}

impl fmt::Display for QueryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, k, v)?;
        }
        Ok(())
    }
}

impl FromStr for QueryDescriptor {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (path, query) = match s.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (s, None),
        };
        if !path.starts_with('/') {
            return Err(QueryParseError::MissingPath(s.to_string()));
        }
        let mut desc = QueryDescriptor::new(path);
        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| QueryParseError::MalformedParam(pair.to_string()))?;
            desc.params.insert(k.to_string(), v.to_string());
        }
        Ok(desc)
    }
}

impl TryFrom<String> for QueryDescriptor {
    type Error = QueryParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<QueryDescriptor> for String {
    fn from(desc: QueryDescriptor) -> Self {
        desc.to_string()
    }
}
