use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::debug;

use crate::model::query::QueryDescriptor;
use crate::model::task::{Task, TaskId, TaskPatch};
use crate::ops::ordering;

use super::backend::{Notifier, Severity, TaskBackend, TaskFetcher};
use super::error::BackendError;

/// In-process server stand-in used by `dbk replay` and the tests.
///
/// Tasks live in a plain list. Writes and fetches can be primed to fail, and
/// every mutating call is counted.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tasks: RefCell<Vec<Task>>,
    completed: RefCell<Vec<TaskId>>,
    next_id: Cell<u64>,
    writes: Cell<usize>,
    fetches: Cell<usize>,
    write_failures: RefCell<VecDeque<BackendError>>,
    fetch_failures: RefCell<VecDeque<BackendError>>,
    /// Scheduler turns the next calls wait before answering
    write_delays: RefCell<VecDeque<u32>>,
    fetch_delays: RefCell<VecDeque<u32>>,
    /// Applied to every saved record, e.g. to mimic server-side snapping
    time_shift: Cell<Option<u32>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let backend = MemoryBackend::new();
        *backend.tasks.borrow_mut() = tasks;
        backend
    }

    /// Make the next write fail with `err`
    pub fn fail_next_write(&self, err: BackendError) {
        self.write_failures.borrow_mut().push_back(err);
    }

    /// Make the next fetch fail with `err`
    pub fn fail_next_fetch(&self, err: BackendError) {
        self.fetch_failures.borrow_mut().push_back(err);
    }

    /// Make the next write yield `turns` times before it lands
    pub fn delay_next_write(&self, turns: u32) {
        self.write_delays.borrow_mut().push_back(turns);
    }

    /// Make the next fetch yield `turns` times before it answers
    pub fn delay_next_fetch(&self, turns: u32) {
        self.fetch_delays.borrow_mut().push_back(turns);
    }

    /// Push every saved start and end time back by `minutes`
    pub fn shift_saved_times(&self, minutes: u32) {
        self.time_shift.set(Some(minutes));
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.borrow().clone()
    }

    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.borrow().iter().find(|t| &t.id == id).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }

    async fn begin_write(&self) -> Result<(), BackendError> {
        self.writes.set(self.writes.get() + 1);
        let failure = self.write_failures.borrow_mut().pop_front();
        pause(&self.write_delays).await;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn assign_id(&self) -> TaskId {
        let n = self.next_id.get() + 1;
        self.next_id.set(n);
        TaskId::new(format!("srv-{}", n))
    }

    fn shifted(&self, mut task: Task) -> Task {
        if let Some(minutes) = self.time_shift.get() {
            task.start_time = task.start_time.map(|t| t.plus_minutes(minutes));
            task.end_time = task.end_time.map(|t| t.plus_minutes(minutes));
            task.normalize_times();
        }
        task
    }
}

#[async_trait(?Send)]
impl TaskBackend for MemoryBackend {
    async fn create(&self, task: &Task) -> Result<Task, BackendError> {
        self.begin_write().await?;
        let mut saved = self.shifted(task.clone());
        if saved.id.is_temporary() {
            saved.id = self.assign_id();
        }
        debug!(from = %task.id, to = %saved.id, "memory backend: create");
        self.tasks.borrow_mut().push(saved.clone());
        Ok(saved)
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, BackendError> {
        self.begin_write().await?;
        let mut tasks = self.tasks.borrow_mut();
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| BackendError::NotFound(id.clone()))?;
        let was_complete = task.is_complete;
        task.apply_patch(patch);
        *task = self.shifted(task.clone());
        if task.is_complete && !was_complete {
            self.completed.borrow_mut().push(id.clone());
        }
        debug!(id = %id, "memory backend: update");
        Ok(task.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<(), BackendError> {
        self.begin_write().await?;
        let mut tasks = self.tasks.borrow_mut();
        let before = tasks.len();
        tasks.retain(|t| &t.id != id);
        if tasks.len() == before {
            return Err(BackendError::NotFound(id.clone()));
        }
        debug!(id = %id, "memory backend: delete");
        Ok(())
    }

    async fn undo_complete(&self) -> Result<Option<Task>, BackendError> {
        self.begin_write().await?;
        let mut completed = self.completed.borrow_mut();
        let mut tasks = self.tasks.borrow_mut();
        while let Some(id) = completed.pop() {
            if let Some(task) = tasks.iter_mut().find(|t| t.id == id && t.is_complete) {
                task.is_complete = false;
                return Ok(Some(task.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait(?Send)]
impl TaskFetcher for MemoryBackend {
    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Task>, BackendError> {
        self.fetches.set(self.fetches.get() + 1);
        let failure = self.fetch_failures.borrow_mut().pop_front();
        pause(&self.fetch_delays).await;
        if let Some(err) = failure {
            return Err(err);
        }
        let mut matching: Vec<Task> = self
            .tasks
            .borrow()
            .iter()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        ordering::sort_tasks(&mut matching);
        Ok(matching)
    }
}

async fn pause(delays: &RefCell<VecDeque<u32>>) {
    let turns = delays.borrow_mut().pop_front().unwrap_or(0);
    for _ in 0..turns {
        tokio::task::yield_now().await;
    }
}

/// Notifier that keeps every message, in order
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: RefCell<Vec<(Severity, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        RecordingNotifier::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.borrow().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.messages
            .borrow()
            .iter()
            .filter(|(s, _)| *s == severity)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        self.messages.borrow_mut().push((severity, message.to_string()));
    }
}
