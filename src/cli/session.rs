use chrono::NaiveDate;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::Deserialize;
use tracing::debug;

use crate::model::config::Config;
use crate::cache::projector::Projector;
use crate::model::query::QueryDescriptor;
use crate::model::task::{ClockTime, Task, TaskId, TaskPatch};
use crate::nav::focus::{FocusEffect, FocusMachine, NavCommand};
use crate::nav::keymap::{Command, command_for_key};
use crate::sync::backend::{Notifier, Severity};
use crate::sync::client::SyncClient;
use crate::sync::engine::{MutationOutcome, MutationStatus};
use crate::sync::error::{BackendError, SyncError};
use crate::sync::memory::{MemoryBackend, RecordingNotifier};
use crate::sync::mutation::{PendingMutation, TargetUpdate};

/// Error type for session scripts
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("could not parse session: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("step {step}: unknown task {id}")]
    UnknownTask { step: usize, id: TaskId },
    #[error("step {step}: unknown key {key:?}")]
    UnknownKey { step: usize, key: String },
    #[error("step {step}: {source}")]
    Sync {
        step: usize,
        #[source]
        source: SyncError,
    },
}

/// A scripted session: the server's starting state, the views to load and
/// the actions to replay against them
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default)]
    pub tasks: Vec<Task>,
    pub views: Vec<QueryDescriptor>,
    /// View the keyboard focus runs over; defaults to the first view
    #[serde(default)]
    pub focus: Option<QueryDescriptor>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    #[default]
    Start,
    End,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub name: String,
    #[serde(default)]
    pub due: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<ClockTime>,
    #[serde(default)]
    pub end_time: Option<ClockTime>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Create a task at the top or bottom of the given views (default: all)
    Create {
        task: NewTask,
        #[serde(default)]
        place: Placement,
        #[serde(default)]
        views: Vec<QueryDescriptor>,
    },
    /// Patch a task where it is listed
    Update { id: TaskId, patch: TaskPatch },
    /// Patch a task's day or times, moving it between day buckets
    Move { id: TaskId, patch: TaskPatch },
    Complete { id: TaskId },
    Archive { id: TaskId },
    Delete { id: TaskId },
    UndoComplete,
    /// Make the server reject the next write
    FailNext {
        #[serde(default = "default_rejection")]
        message: String,
    },
    Refresh { view: QueryDescriptor },
    /// A key press, e.g. `down`, `ctrl+up`, `alt+down`, `t`, `0`, `enter`
    Key { key: String },
}

fn default_rejection() -> String {
    "rejected by script".to_string()
}

impl Step {
    pub fn describe(&self) -> String {
        match self {
            Step::Create { task, .. } => format!("create {:?}", task.name),
            Step::Update { id, .. } => format!("update {}", id),
            Step::Move { id, .. } => format!("move {}", id),
            Step::Complete { id } => format!("complete {}", id),
            Step::Archive { id } => format!("archive {}", id),
            Step::Delete { id } => format!("delete {}", id),
            Step::UndoComplete => "undo completion".to_string(),
            Step::FailNext { .. } => "fail next write".to_string(),
            Step::Refresh { view } => format!("refresh {}", view),
            Step::Key { key } => format!("key {}", key),
        }
    }
}

pub fn parse_session(text: &str) -> Result<Session, SessionError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse `mod+mod+key` into a key event
pub fn parse_key(combo: &str) -> Option<KeyEvent> {
    let mut modifiers = KeyModifiers::NONE;
    let mut parts: Vec<&str> = combo.split('+').collect();
    let key = parts.pop()?;
    for part in parts {
        modifiers |= match part.to_ascii_lowercase().as_str() {
            "ctrl" => KeyModifiers::CONTROL,
            "cmd" | "super" => KeyModifiers::SUPER,
            "alt" | "opt" => KeyModifiers::ALT,
            "shift" => KeyModifiers::SHIFT,
            _ => return None,
        };
    }
    let code = match key.to_ascii_lowercase().as_str() {
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "enter" => KeyCode::Enter,
        "esc" => KeyCode::Esc,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => KeyCode::Char(c),
                _ => return None,
            }
        }
    };
    Some(KeyEvent::new(code, modifiers))
}

/// One replayed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub action: String,
    pub result: String,
}

/// Replays a session against an in-memory server
pub struct Replay {
    client: SyncClient<MemoryBackend, RecordingNotifier>,
    views: Vec<QueryDescriptor>,
    focus_view: Option<QueryDescriptor>,
    focus: FocusMachine,
    results: Vec<StepResult>,
}

impl Replay {
    pub fn new(session: &Session, config: Config) -> Self {
        let duration = config.edit.default_duration_minutes;
        let views = session.views.clone();
        let focus_view = session.focus.clone().or_else(|| views.first().cloned());
        Replay {
            client: SyncClient::new(
                MemoryBackend::with_tasks(session.tasks.clone()),
                RecordingNotifier::new(),
                config,
            ),
            views,
            focus_view,
            focus: FocusMachine::new(duration),
            results: Vec::new(),
        }
    }

    pub fn client(&self) -> &SyncClient<MemoryBackend, RecordingNotifier> {
        &self.client
    }

    pub fn with_recovery_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.client = self.client.with_recovery_dir(dir);
        self
    }

    pub fn views(&self) -> &[QueryDescriptor] {
        &self.views
    }

    pub fn focus(&self) -> &FocusMachine {
        &self.focus
    }

    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    /// Load every view, then run the steps in order
    pub async fn run(&mut self, steps: Vec<Step>) -> Result<(), SessionError> {
        for view in &self.views {
            self.client
                .load(view)
                .await
                .map_err(|source| SessionError::Sync { step: 0, source })?;
        }
        self.sync_focus();

        for (i, step) in steps.into_iter().enumerate() {
            let step_no = i + 1;
            let action = step.describe();
            debug!(step = step_no, action = %action, "replaying");
            let result = self.run_step(step_no, step).await?;
            self.sync_focus();
            self.results.push(StepResult { action, result });
        }
        Ok(())
    }

    async fn run_step(&mut self, step: usize, action: Step) -> Result<String, SessionError> {
        let mutation = match action {
            Step::Create { task, place, views } => {
                let draft = Task::draft(task.name)
                    .with_due(task.due)
                    .with_times(task.start_time, task.end_time);
                let views = if views.is_empty() { self.views.clone() } else { views };
                match place {
                    Placement::Start => PendingMutation::create_at_start(draft, &views),
                    Placement::End => PendingMutation::create_at_end(draft, &views),
                }
            }
            Step::Update { id, patch } => {
                let original = self.find(step, &id)?;
                PendingMutation::update(&original, patch, &self.views_holding(&id))
            }
            Step::Move { id, patch } => {
                let original = self.find(step, &id)?;
                self.move_mutation(&original, patch)
            }
            Step::Complete { id } => {
                let original = self.find(step, &id)?;
                self.yield_focus_from(&id);
                let views = self.views_holding(&id);
                PendingMutation::update_and_remove(&original, TaskPatch::complete(true), &views)
            }
            Step::Archive { id } => {
                let original = self.find(step, &id)?;
                self.yield_focus_from(&id);
                PendingMutation::toggle_archive(&original)
            }
            Step::Delete { id } => {
                self.yield_focus_from(&id);
                PendingMutation::delete(id.clone(), &self.views_holding(&id))
            }
            Step::UndoComplete => PendingMutation::undo_complete(),
            Step::FailNext { message } => {
                self.client
                    .backend()
                    .fail_next_write(BackendError::Rejected(message));
                return Ok("armed".to_string());
            }
            Step::Refresh { view } => {
                return Ok(match self.client.refresh(&view).await {
                    Ok(_) => "refreshed".to_string(),
                    Err(err) => format!("refresh failed: {}", err),
                });
            }
            Step::Key { key } => return self.press(step, key).await,
        };
        self.apply(step, mutation).await
    }

    async fn press(&mut self, step: usize, key: String) -> Result<String, SessionError> {
        let event = parse_key(&key).ok_or_else(|| SessionError::UnknownKey {
            step,
            key: key.clone(),
        })?;
        let Some(command) = command_for_key(self.focus.mode(), event) else {
            return Ok("ignored".to_string());
        };
        let nav = match command {
            Command::UndoComplete => {
                return self.apply(step, PendingMutation::undo_complete()).await;
            }
            Command::Nav(nav) => nav,
        };
        match self.focus.handle(nav) {
            None => Ok(match self.focus.focused() {
                Some(id) => format!("focus {}", id),
                None => "no focus".to_string(),
            }),
            Some(FocusEffect::InvalidTime { task, error }) => {
                self.client
                    .notifier()
                    .notify(Severity::Error, &format!("{}: {}", task, error));
                Ok(format!("invalid time: {}", error))
            }
            Some(FocusEffect::UpdateTimes { task, patch }) => {
                let mutation = self.move_mutation(&task, patch);
                self.apply(step, mutation).await
            }
        }
    }

    async fn apply(
        &mut self,
        step: usize,
        mutation: PendingMutation,
    ) -> Result<String, SessionError> {
        let outcome = self
            .client
            .apply(mutation)
            .await
            .map_err(|source| SessionError::Sync { step, source })?;
        Ok(describe_outcome(&outcome))
    }

    /// The cached copy of `id`, falling back to the server's
    fn find(&self, step: usize, id: &TaskId) -> Result<Task, SessionError> {
        let cached = self.client.with_store(|store| {
            store
                .descriptors()
                .filter_map(|d| store.get(d))
                .flat_map(|e| e.tasks().iter())
                .find(|t| &t.id == id)
                .cloned()
        });
        cached
            .or_else(|| self.client.backend().get(id))
            .ok_or_else(|| SessionError::UnknownTask {
                step,
                id: id.clone(),
            })
    }

    /// Patch `original` across the session's views: loaded day buckets get
    /// the remove/insert pair, any other loaded view listing the task gets
    /// the record updated in place or re-sorted.
    fn move_mutation(&self, original: &Task, patch: TaskPatch) -> PendingMutation {
        let updated = original.patched(&patch);
        let source = QueryDescriptor::bucket_of(original);
        let mut mutation = PendingMutation::update_and_move(original, patch, source);
        mutation.targets.retain(|t| self.views.contains(&t.query));
        for view in self.views_holding(&original.id) {
            if !mutation.targets.iter().any(|t| t.query == view) {
                mutation
                    .targets
                    .push(TargetUpdate::new(view, Projector::Update(updated.clone())));
            }
        }
        mutation
    }

    /// Loaded views currently listing `id`
    fn views_holding(&self, id: &TaskId) -> Vec<QueryDescriptor> {
        self.client.with_store(|store| {
            store
                .descriptors()
                .filter(|d| {
                    store
                        .get(d)
                        .is_some_and(|e| e.tasks().iter().any(|t| &t.id == id))
                })
                .cloned()
                .collect()
        })
    }

    fn yield_focus_from(&mut self, id: &TaskId) {
        if self.focus.focused() == Some(id) {
            self.focus.handle(NavCommand::YieldFocus);
        }
    }

    fn sync_focus(&mut self) {
        let Some(view) = &self.focus_view else {
            return;
        };
        if let Ok(tasks) = self.client.tasks(view) {
            self.focus.handle(NavCommand::ListChanged(tasks));
        }
    }
}

pub fn describe_outcome(outcome: &MutationOutcome) -> String {
    match &outcome.status {
        MutationStatus::Confirmed(Some(task)) => format!("confirmed {}", task.id),
        MutationStatus::Confirmed(None) => "confirmed".to_string(),
        MutationStatus::RolledBack(err) => format!("rolled back: {}", err),
    }
}
