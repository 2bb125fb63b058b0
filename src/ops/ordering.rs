use std::cmp::Ordering;

use crate::model::task::Task;

/// Where a list view draws a visual break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMarker {
    /// First task of a due-date group (day header, or "Backlog")
    DayStart(usize),
    /// First timed task that follows an untimed one
    TimedDivider(usize),
}

/// A task is timed iff it has a start time
pub fn is_timed(task: &Task) -> bool {
    task.is_timed()
}

/// Total order used for rendering and insertion.
///
/// Dated tasks come first in date order, backlog (no due date) last. Within
/// one date untimed tasks precede timed ones. Untimed tasks compare equal to
/// each other so their manual order survives a stable sort. Timed tasks
/// order by start, end, then id.
pub fn compare_tasks(a: &Task, b: &Task) -> Ordering {
    let by_due = match (a.due, b.due) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    if by_due != Ordering::Equal {
        return by_due;
    }

    match (a.start_time, b.start_time) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| a.end_time.cmp(&b.end_time))
            .then_with(|| a.id.cmp(&b.id)),
    }
}

/// First index `i` with `compare_tasks(task, ordered[i]) <= 0`, or the list
/// length when the task sorts after everything.
pub fn find_insertion_index(ordered: &[Task], task: &Task) -> usize {
    ordered
        .iter()
        .position(|other| compare_tasks(task, other) != Ordering::Greater)
        .unwrap_or(ordered.len())
}

/// Insert at the position `find_insertion_index` picks. Returns that index.
pub fn insert_sorted(tasks: &mut Vec<Task>, task: Task) -> usize {
    let idx = find_insertion_index(tasks, &task);
    tasks.insert(idx, task);
    idx
}

/// Stable sort; server results arrive in storage order
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(compare_tasks);
}

/// Indices where a new due-date group begins
pub fn day_starts(tasks: &[Task]) -> Vec<usize> {
    tasks
        .iter()
        .enumerate()
        .filter(|(i, t)| *i == 0 || tasks[i - 1].due != t.due)
        .map(|(i, _)| i)
        .collect()
}

/// Day headers plus the gap drawn before the first timed task of a day
pub fn section_markers(tasks: &[Task]) -> Vec<SectionMarker> {
    let mut markers = Vec::new();
    for (i, task) in tasks.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| &tasks[p]);
        if prev.is_none_or(|p| p.due != task.due) {
            markers.push(SectionMarker::DayStart(i));
        }
        if let Some(p) = prev
            && p.due == task.due
            && task.is_timed()
            && !p.is_timed()
        {
            markers.push(SectionMarker::TimedDivider(i));
        }
    }
    markers
}
