use tracing::debug;

use crate::model::task::{Task, TaskId, TaskPatch, TimeError};
use crate::ops::ordering;

use super::time_edit::TimeDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Interaction mode of the focused list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Navigate,
    EditTime(TimeDraft),
}

/// Abstract input to the focus machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavCommand {
    FocusNext,
    FocusPrevious,
    JumpToGroupStart(Direction),
    StepByTwo(Direction),
    BeginEditTime,
    CommitEditTime,
    CancelEditTime,
    ToggleTimeField,
    TypeDigit(char),
    Backspace,
    /// Pointer focus on a specific task
    Focus(TaskId),
    /// The focused task is about to leave the list (completed, archived,
    /// deleted): hand focus to its neighbour first
    YieldFocus,
    ListChanged(Vec<Task>),
}

/// Side effect requested by a transition; the caller turns it into a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusEffect {
    UpdateTimes { task: Task, patch: TaskPatch },
    InvalidTime { task: TaskId, error: TimeError },
}

/// Keyboard focus over one ordered task list.
///
/// Holds its own copy of the list; feed it `ListChanged` whenever the cache
/// entry it renders changes.
#[derive(Debug, Clone)]
pub struct FocusMachine {
    tasks: Vec<Task>,
    focused: Option<TaskId>,
    mode: Mode,
    default_duration: u32,
}

impl FocusMachine {
    pub fn new(default_duration_minutes: u32) -> Self {
        FocusMachine {
            tasks: Vec::new(),
            focused: None,
            mode: Mode::Navigate,
            default_duration: default_duration_minutes,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.handle(NavCommand::ListChanged(tasks));
        self
    }

    pub fn focused(&self) -> Option<&TaskId> {
        self.focused.as_ref()
    }

    pub fn focused_task(&self) -> Option<&Task> {
        let idx = self.focused_index()?;
        self.tasks.get(idx)
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, Mode::EditTime(_))
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn handle(&mut self, command: NavCommand) -> Option<FocusEffect> {
        match command {
            NavCommand::ListChanged(tasks) => {
                self.list_changed(tasks);
                None
            }
            NavCommand::Focus(id) => {
                if !self.tasks.iter().any(|t| t.id == id) {
                    return None;
                }
                let effect = self.finish_edit(false);
                self.focused = Some(id);
                effect
            }
            NavCommand::YieldFocus => {
                self.mode = Mode::Navigate;
                self.yield_focus();
                None
            }
            command if self.is_editing() => self.handle_edit(command),
            command => {
                self.handle_navigate(command);
                None
            }
        }
    }

    fn handle_navigate(&mut self, command: NavCommand) {
        let Some(idx) = self.focused_index() else {
            return;
        };
        let last = self.tasks.len() - 1;
        let target = match command {
            NavCommand::FocusNext => (idx + 1).min(last),
            NavCommand::FocusPrevious => idx.saturating_sub(1),
            NavCommand::StepByTwo(Direction::Forward) => (idx + 2).min(last),
            NavCommand::StepByTwo(Direction::Backward) => idx.saturating_sub(2),
            NavCommand::JumpToGroupStart(direction) => {
                let starts = ordering::day_starts(&self.tasks);
                let found = match direction {
                    Direction::Forward => starts.into_iter().find(|&s| s > idx),
                    Direction::Backward => starts.into_iter().rev().find(|&s| s < idx),
                };
                found.unwrap_or(idx)
            }
            NavCommand::BeginEditTime => {
                let draft = TimeDraft::from_task(&self.tasks[idx], self.default_duration);
                self.mode = Mode::EditTime(draft);
                return;
            }
            _ => return,
        };
        self.focused = Some(self.tasks[target].id.clone());
    }

    fn handle_edit(&mut self, command: NavCommand) -> Option<FocusEffect> {
        let Mode::EditTime(draft) = &mut self.mode else {
            return None;
        };
        match command {
            NavCommand::ToggleTimeField => draft.toggle_field(),
            NavCommand::TypeDigit(c) => draft.push(c),
            NavCommand::Backspace => draft.backspace(),
            NavCommand::CommitEditTime => return self.finish_edit(true),
            NavCommand::CancelEditTime => return self.finish_edit(false),
            _ => {}
        }
        None
    }

    /// Leave EDIT_TIME. A commit always writes; a cancel writes only when the
    /// draft differs from the task. Either way the draft is never discarded
    /// silently.
    fn finish_edit(&mut self, always_write: bool) -> Option<FocusEffect> {
        let Mode::EditTime(draft) = std::mem::replace(&mut self.mode, Mode::Navigate) else {
            return None;
        };
        let task = self.focused_task()?.clone();
        match draft.patch_for(&task) {
            Ok(Some(patch)) => Some(FocusEffect::UpdateTimes { task, patch }),
            Ok(None) if always_write => {
                let patch = TaskPatch::times(task.start_time, task.end_time);
                Some(FocusEffect::UpdateTimes { task, patch })
            }
            Ok(None) => None,
            Err(error) => {
                debug!(task = %task.id, error = %error, "time edit rejected");
                Some(FocusEffect::InvalidTime {
                    task: task.id,
                    error,
                })
            }
        }
    }

    fn list_changed(&mut self, tasks: Vec<Task>) {
        let was_empty = self.tasks.is_empty();
        let previous = std::mem::replace(&mut self.tasks, tasks);

        match self.focused.clone() {
            Some(id) if self.tasks.iter().any(|t| t.id == id) => {}
            Some(id) => {
                if self.is_editing() {
                    debug!(task = %id, "focused task left the list, dropping time edit");
                    self.mode = Mode::Navigate;
                }
                let prev_idx = previous.iter().position(|t| t.id == id).unwrap_or(0);
                self.focused = self.nearest_survivor(&previous, prev_idx);
            }
            None if was_empty => {
                self.focused = self.tasks.first().map(|t| t.id.clone());
            }
            None => {}
        }
    }

    /// The task nearest to `prev_idx` in the old list that is still listed,
    /// lower index first. Falls back to the same position in the new list.
    fn nearest_survivor(&self, previous: &[Task], prev_idx: usize) -> Option<TaskId> {
        let survives = |i: usize| {
            previous
                .get(i)
                .filter(|t| self.tasks.iter().any(|n| n.id == t.id))
                .map(|t| t.id.clone())
        };
        for distance in 0..=previous.len() {
            let before = prev_idx.checked_sub(distance).and_then(survives);
            if before.is_some() {
                return before;
            }
            if let Some(after) = survives(prev_idx + distance) {
                return Some(after);
            }
        }
        let last = self.tasks.len().checked_sub(1)?;
        Some(self.tasks[prev_idx.min(last)].id.clone())
    }

    fn yield_focus(&mut self) {
        let Some(idx) = self.focused_index() else {
            return;
        };
        self.focused = if idx > 0 {
            Some(self.tasks[idx - 1].id.clone())
        } else {
            self.tasks.get(1).map(|t| t.id.clone())
        };
    }

    fn focused_index(&self) -> Option<usize> {
        let id = self.focused.as_ref()?;
        self.tasks.iter().position(|t| &t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn task(id: &str, day: u32) -> Task {
        Task::new(
            TaskId::from(id),
            id,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_due(NaiveDate::from_ymd_opt(2024, 1, day))
    }

    fn machine(tasks: Vec<Task>) -> FocusMachine {
        FocusMachine::new(60).with_tasks(tasks)
    }

    fn focused(m: &FocusMachine) -> Option<&str> {
        m.focused().map(TaskId::as_str)
    }

    fn three() -> Vec<Task> {
        vec![task("t1", 10), task("t2", 10), task("t3", 10)]
    }

    #[test]
    fn test_first_list_focuses_first_task() {
        let m = machine(three());
        assert_eq!(focused(&m), Some("t1"));
        assert_eq!(machine(vec![]).focused(), None);
    }

    #[test]
    fn test_next_and_previous_clamp() {
        let mut m = machine(three());
        m.handle(NavCommand::FocusPrevious);
        assert_eq!(focused(&m), Some("t1"));
        m.handle(NavCommand::FocusNext);
        m.handle(NavCommand::FocusNext);
        m.handle(NavCommand::FocusNext);
        assert_eq!(focused(&m), Some("t3"));
    }

    #[test]
    fn test_single_item_stays_put() {
        let mut m = machine(vec![task("only", 10)]);
        m.handle(NavCommand::FocusNext);
        m.handle(NavCommand::StepByTwo(Direction::Forward));
        assert_eq!(focused(&m), Some("only"));
    }

    #[test]
    fn test_no_focus_short_circuits() {
        let mut m = FocusMachine::new(60);
        m.handle(NavCommand::ListChanged(vec![]));
        for command in [
            NavCommand::FocusNext,
            NavCommand::StepByTwo(Direction::Backward),
            NavCommand::JumpToGroupStart(Direction::Forward),
            NavCommand::BeginEditTime,
        ] {
            assert_eq!(m.handle(command), None);
        }
        assert_eq!(m.focused(), None);
        assert!(!m.is_editing());
    }

    #[test]
    fn test_step_by_two_falls_back_to_one() {
        let mut m = machine(vec![
            task("a", 10),
            task("b", 10),
            task("c", 10),
            task("d", 10),
        ]);
        m.handle(NavCommand::StepByTwo(Direction::Forward));
        assert_eq!(focused(&m), Some("c"));
        m.handle(NavCommand::StepByTwo(Direction::Forward));
        assert_eq!(focused(&m), Some("d"));
        m.handle(NavCommand::StepByTwo(Direction::Forward));
        assert_eq!(focused(&m), Some("d"));
        m.handle(NavCommand::StepByTwo(Direction::Backward));
        assert_eq!(focused(&m), Some("b"));
        m.handle(NavCommand::StepByTwo(Direction::Backward));
        assert_eq!(focused(&m), Some("a"));
    }

    #[test]
    fn test_jump_between_day_groups() {
        let mut m = machine(vec![
            task("a", 10),
            task("b", 10),
            task("c", 11),
            task("d", 11),
            task("e", 12),
        ]);
        m.handle(NavCommand::JumpToGroupStart(Direction::Forward));
        assert_eq!(focused(&m), Some("c"));
        m.handle(NavCommand::JumpToGroupStart(Direction::Forward));
        assert_eq!(focused(&m), Some("e"));
        // Already in the last group
        m.handle(NavCommand::JumpToGroupStart(Direction::Forward));
        assert_eq!(focused(&m), Some("e"));

        m.handle(NavCommand::FocusPrevious);
        assert_eq!(focused(&m), Some("d"));
        m.handle(NavCommand::JumpToGroupStart(Direction::Backward));
        assert_eq!(focused(&m), Some("c"));
        m.handle(NavCommand::JumpToGroupStart(Direction::Backward));
        assert_eq!(focused(&m), Some("a"));
    }

    #[test]
    fn test_deleted_focus_moves_to_lower_neighbour() {
        let mut m = machine(three());
        m.handle(NavCommand::FocusNext);
        assert_eq!(focused(&m), Some("t2"));
        m.handle(NavCommand::ListChanged(vec![task("t1", 10), task("t3", 10)]));
        assert_eq!(focused(&m), Some("t1"));
    }

    #[test]
    fn test_deleted_first_task_moves_focus_down() {
        let mut m = machine(three());
        m.handle(NavCommand::ListChanged(vec![task("t2", 10), task("t3", 10)]));
        assert_eq!(focused(&m), Some("t2"));
    }

    #[test]
    fn test_replaced_list_keeps_position() {
        let mut m = machine(three());
        m.handle(NavCommand::FocusNext);
        m.handle(NavCommand::ListChanged(vec![
            task("x", 10),
            task("y", 10),
            task("z", 10),
        ]));
        assert_eq!(focused(&m), Some("y"));
        m.handle(NavCommand::ListChanged(vec![]));
        assert_eq!(m.focused(), None);
    }

    #[test]
    fn test_yield_focus_prefers_previous() {
        let mut m = machine(three());
        m.handle(NavCommand::FocusNext);
        m.handle(NavCommand::YieldFocus);
        assert_eq!(focused(&m), Some("t1"));
        m.handle(NavCommand::YieldFocus);
        assert_eq!(focused(&m), Some("t2"));

        let mut single = machine(vec![task("only", 10)]);
        single.handle(NavCommand::YieldFocus);
        assert_eq!(single.focused(), None);
    }

    #[test]
    fn test_commit_always_writes() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        assert!(m.is_editing());
        let effect = m.handle(NavCommand::CommitEditTime);
        assert!(!m.is_editing());
        assert_eq!(
            effect,
            Some(FocusEffect::UpdateTimes {
                task: task("t1", 10),
                patch: TaskPatch::times(None, None),
            })
        );
    }

    #[test]
    fn test_cancel_writes_only_when_changed() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        assert_eq!(m.handle(NavCommand::CancelEditTime), None);

        m.handle(NavCommand::BeginEditTime);
        for c in "0900".chars() {
            m.handle(NavCommand::TypeDigit(c));
        }
        let effect = m.handle(NavCommand::CancelEditTime);
        let expected = TaskPatch::times(Some("0900".parse().unwrap()), Some("1000".parse().unwrap()));
        assert_eq!(
            effect,
            Some(FocusEffect::UpdateTimes {
                task: task("t1", 10),
                patch: expected,
            })
        );
    }

    #[test]
    fn test_invalid_time_reports_without_write() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        m.handle(NavCommand::TypeDigit('9'));
        let effect = m.handle(NavCommand::CommitEditTime);
        assert!(matches!(effect, Some(FocusEffect::InvalidTime { .. })));
        assert!(!m.is_editing());
    }

    #[test]
    fn test_navigation_ignored_while_editing() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        m.handle(NavCommand::FocusNext);
        assert_eq!(focused(&m), Some("t1"));
        assert!(m.is_editing());
    }

    #[test]
    fn test_focused_task_vanishing_drops_edit() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        m.handle(NavCommand::TypeDigit('1'));
        m.handle(NavCommand::ListChanged(vec![task("t2", 10), task("t3", 10)]));
        assert!(!m.is_editing());
        assert_eq!(focused(&m), Some("t2"));
    }

    #[test]
    fn test_pointer_focus_commits_open_edit() {
        let mut m = machine(three());
        m.handle(NavCommand::BeginEditTime);
        for c in "0800".chars() {
            m.handle(NavCommand::TypeDigit(c));
        }
        let effect = m.handle(NavCommand::Focus(TaskId::from("t3")));
        assert!(matches!(effect, Some(FocusEffect::UpdateTimes { .. })));
        assert_eq!(focused(&m), Some("t3"));

        assert_eq!(m.handle(NavCommand::Focus(TaskId::from("nope"))), None);
        assert_eq!(focused(&m), Some("t3"));
    }
}
