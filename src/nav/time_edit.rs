use crate::model::task::{ClockTime, Task, TaskPatch, TimeError};

/// Which half of the time range is being typed into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Start,
    End,
}

/// In-progress text of a time edit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeDraft {
    start: String,
    end: String,
    field: TimeField,
    /// Minutes added to a freshly typed start to derive the end
    duration: u32,
}

impl TimeDraft {
    pub fn from_task(task: &Task, duration: u32) -> Self {
        TimeDraft {
            start: task.start_time.map(|t| t.to_string()).unwrap_or_default(),
            end: task.end_time.map(|t| t.to_string()).unwrap_or_default(),
            field: TimeField::Start,
            duration,
        }
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn field(&self) -> TimeField {
        self.field
    }

    pub fn toggle_field(&mut self) {
        self.field = match self.field {
            TimeField::Start => TimeField::End,
            TimeField::End => TimeField::Start,
        };
    }

    /// Type one character into the active field. Non-digits and a fifth
    /// digit are ignored.
    pub fn push(&mut self, c: char) {
        if !c.is_ascii_digit() {
            return;
        }
        let text = self.active_mut();
        if text.len() >= 4 {
            return;
        }
        text.push(c);
        self.start_edited();
    }

    pub fn backspace(&mut self) {
        self.active_mut().pop();
        self.start_edited();
    }

    /// Parse the draft into `(start, end)`. A blank start means untimed; a
    /// blank end means "same as start".
    pub fn parse(&self) -> Result<(Option<ClockTime>, Option<ClockTime>), TimeError> {
        if self.start.trim().is_empty() {
            return Ok((None, None));
        }
        let start: ClockTime = self.start.parse()?;
        let end = match self.end.trim() {
            "" => None,
            text => Some(text.parse::<ClockTime>()?),
        };
        Ok((Some(start), end))
    }

    /// The patch this draft writes to `task`, or `None` when it leaves the
    /// task's times unchanged
    pub fn patch_for(&self, task: &Task) -> Result<Option<TaskPatch>, TimeError> {
        let (start, end) = self.parse()?;
        let patched = task.clone().with_times(start, end);
        if patched.start_time == task.start_time && patched.end_time == task.end_time {
            return Ok(None);
        }
        Ok(Some(TaskPatch::times(patched.start_time, patched.end_time)))
    }

    fn active_mut(&mut self) -> &mut String {
        match self.field {
            TimeField::Start => &mut self.start,
            TimeField::End => &mut self.end,
        }
    }

    /// Editing the start re-derives the end once the start is complete
    fn start_edited(&mut self) {
        if self.field != TimeField::Start {
            return;
        }
        if let Ok(start) = self.start.parse::<ClockTime>() {
            self.end = start.plus_minutes(self.duration).to_string();
        }
    }
}
