use serde::Serialize;

use crate::io::recovery::RecoveryEntry;
use crate::model::query::QueryDescriptor;
use crate::model::task::Task;
use crate::ops::ordering::{SectionMarker, section_markers};
use crate::sync::backend::Severity;

// ---------------------------------------------------------------------------
// JSON output structs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct ViewJson<'a> {
    pub query: String,
    pub stale: bool,
    pub tasks: &'a [Task],
}

#[derive(Serialize)]
pub struct StepJson {
    pub step: usize,
    pub action: String,
    pub result: String,
}

#[derive(Serialize)]
pub struct NotificationJson<'a> {
    pub severity: Severity,
    pub message: &'a str,
}

#[derive(Serialize)]
pub struct ReplayJson<'a> {
    pub steps: &'a [StepJson],
    pub views: Vec<ViewJson<'a>>,
    pub notifications: Vec<NotificationJson<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus: Option<&'a str>,
    pub backend_writes: usize,
}

// ---------------------------------------------------------------------------
// Human-readable formatting
// ---------------------------------------------------------------------------

fn check_char(task: &Task) -> char {
    if task.is_complete { 'x' } else { ' ' }
}

fn time_range(task: &Task) -> String {
    match (task.start_time, task.end_time) {
        (Some(start), Some(end)) if end != start => format!("{}-{}", start, end),
        (Some(start), _) => format!("{}", start),
        _ => String::new(),
    }
}

/// Format a single task as a one-line summary
pub fn format_task_line(task: &Task) -> String {
    let time = time_range(task);
    let time = if time.is_empty() {
        String::new()
    } else {
        format!(" {}", time)
    };
    format!("[{}] {}{} {}", check_char(task), task.id, time, task.name)
}

fn day_header(task: &Task) -> String {
    match task.due {
        Some(due) => format!("## {}", due.format("%a %Y-%m-%d")),
        None => "## backlog".to_string(),
    }
}

/// Render an ordered list with a header per day and a rule above the first
/// timed task of each day
pub fn format_ordered(tasks: &[Task]) -> Vec<String> {
    let markers = section_markers(tasks);
    let mut lines = Vec::new();
    for (i, task) in tasks.iter().enumerate() {
        for marker in markers.iter().filter(|m| marker_index(m) == i) {
            match marker {
                SectionMarker::DayStart(_) => {
                    if !lines.is_empty() {
                        lines.push(String::new());
                    }
                    lines.push(day_header(task));
                }
                SectionMarker::TimedDivider(_) => lines.push("  ----".to_string()),
            }
        }
        lines.push(format!("  {}", format_task_line(task)));
    }
    lines
}

fn marker_index(marker: &SectionMarker) -> usize {
    match marker {
        SectionMarker::DayStart(i) | SectionMarker::TimedDivider(i) => *i,
    }
}

pub fn format_view(query: &QueryDescriptor, stale: bool, tasks: &[Task]) -> Vec<String> {
    let mut lines = vec![format!(
        "== {}{}",
        query,
        if stale { " (stale)" } else { "" }
    )];
    if tasks.is_empty() {
        lines.push("  (empty)".to_string());
    } else {
        lines.extend(format_ordered(tasks));
    }
    lines
}

pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Error => "error",
    }
}

pub fn format_recovery_entry(entry: &RecoveryEntry) -> Vec<String> {
    let mut lines = vec![format!(
        "{} {} {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.category,
        entry.description
    )];
    for (key, value) in &entry.fields {
        lines.push(format!("  {}: {}", key, value));
    }
    for line in entry.body.lines() {
        lines.push(format!("  | {}", line));
    }
    lines
}
