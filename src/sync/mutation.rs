use std::fmt;

use serde::Serialize;

use crate::cache::projector::Projector;
use crate::model::query::QueryDescriptor;
use crate::model::task::{Task, TaskId, TaskPatch};

/// Dispatch-order identity of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(pub(crate) u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// The write sent to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteRequest {
    Create { task: Task },
    Update { id: TaskId, patch: TaskPatch },
    Delete { id: TaskId },
    /// Reopen the most recently completed task
    UndoComplete,
}

impl WriteRequest {
    pub fn describe(&self) -> String {
        match self {
            WriteRequest::Create { task } => format!("create {}", task.id),
            WriteRequest::Update { id, .. } => format!("update {}", id),
            WriteRequest::Delete { id } => format!("delete {}", id),
            WriteRequest::UndoComplete => "undo completion".to_string(),
        }
    }
}

/// One view a mutation touches
#[derive(Debug, Clone)]
pub struct TargetUpdate {
    pub query: QueryDescriptor,
    /// `None` leaves the cached list alone (the view is only re-fetched)
    pub projector: Option<Projector>,
    /// Invalidate the view once the write succeeds
    pub refetch_on_settle: bool,
}

impl TargetUpdate {
    pub fn new(query: QueryDescriptor, projector: Projector) -> Self {
        TargetUpdate {
            query,
            projector: Some(projector),
            refetch_on_settle: false,
        }
    }

    pub fn refetch_only(query: QueryDescriptor) -> Self {
        TargetUpdate {
            query,
            projector: None,
            refetch_on_settle: true,
        }
    }
}

/// An intended change plus its optimistic effect on every affected view
#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub request: WriteRequest,
    pub targets: Vec<TargetUpdate>,
    /// Shown when the mutation is dispatched
    pub pending_message: Option<String>,
    /// Shown when the server confirms it
    pub success_message: Option<String>,
}

impl PendingMutation {
    pub fn new(request: WriteRequest, targets: Vec<TargetUpdate>) -> Self {
        PendingMutation {
            request,
            targets,
            pending_message: None,
            success_message: None,
        }
    }

    /// Create `task` at the top of every target view
    pub fn create_at_start(task: Task, targets: &[QueryDescriptor]) -> Self {
        Self::create_with(task, targets, Projector::AppendStart).refetch_on_settle(true)
    }

    /// Create `task` at the bottom of every target view
    pub fn create_at_end(task: Task, targets: &[QueryDescriptor]) -> Self {
        Self::create_with(task, targets, Projector::AppendEnd).refetch_on_settle(true)
    }

    fn create_with(task: Task, targets: &[QueryDescriptor], place: fn(Task) -> Projector) -> Self {
        let targets = targets
            .iter()
            .map(|q| TargetUpdate::new(q.clone(), place(task.clone())))
            .collect();
        PendingMutation::new(WriteRequest::Create { task }, targets)
    }

    /// Patch `original` and replace it in every target view
    pub fn update(original: &Task, patch: TaskPatch, targets: &[QueryDescriptor]) -> Self {
        let updated = original.patched(&patch);
        let targets = targets
            .iter()
            .map(|q| TargetUpdate::new(q.clone(), Projector::Update(updated.clone())))
            .collect();
        PendingMutation::new(
            WriteRequest::Update {
                id: original.id.clone(),
                patch,
            },
            targets,
        )
    }

    /// Patch `original`, which is shown in the day bucket `source`. If the
    /// patch changes the task's day or timed-ness, it leaves `source` and is
    /// inserted in sorted position into its new bucket. Otherwise the task is
    /// updated where it is and no remove/insert pair is projected.
    pub fn update_and_move(original: &Task, patch: TaskPatch, source: QueryDescriptor) -> Self {
        let updated = original.patched(&patch);
        let destination = QueryDescriptor::bucket_of(&updated);
        let targets = if destination == source {
            vec![TargetUpdate::new(source, Projector::Update(updated))]
        } else {
            vec![
                TargetUpdate::new(source, Projector::Delete(updated.id.clone())),
                TargetUpdate::new(destination, Projector::InsertSorted(updated)),
            ]
        };
        PendingMutation::new(
            WriteRequest::Update {
                id: original.id.clone(),
                patch,
            },
            targets,
        )
    }

    /// Delete `id` from the server and from every target view
    pub fn delete(id: TaskId, targets: &[QueryDescriptor]) -> Self {
        let projected = targets
            .iter()
            .map(|q| TargetUpdate::new(q.clone(), Projector::Delete(id.clone())))
            .collect();
        PendingMutation::new(WriteRequest::Delete { id }, projected).refetch_on_settle(true)
    }

    /// Write `patch` and drop the task from every target view, e.g. marking
    /// it complete takes it out of the inbox.
    pub fn update_and_remove(original: &Task, patch: TaskPatch, targets: &[QueryDescriptor]) -> Self {
        let projected = targets
            .iter()
            .map(|q| TargetUpdate::new(q.clone(), Projector::Delete(original.id.clone())))
            .collect();
        PendingMutation::new(
            WriteRequest::Update {
                id: original.id.clone(),
                patch,
            },
            projected,
        )
    }

    /// Flip the archive flag; the task leaves whichever list shows it and
    /// both lists are re-fetched.
    pub fn toggle_archive(task: &Task) -> Self {
        let patch = TaskPatch {
            is_archived: Some(!task.is_archived),
            ..Default::default()
        };
        Self::update_and_remove(
            task,
            patch,
            &[QueryDescriptor::inbox(), QueryDescriptor::archive()],
        )
        .refetch_on_settle(true)
    }

    /// Reopen the last completed task. Nothing is projected locally, the
    /// server decides which task comes back.
    pub fn undo_complete() -> Self {
        PendingMutation::new(
            WriteRequest::UndoComplete,
            vec![
                TargetUpdate::refetch_only(QueryDescriptor::inbox()),
                TargetUpdate::refetch_only(QueryDescriptor::archive()),
            ],
        )
        .with_messages("Recovering latest completed task", "Recovered task")
    }

    pub fn refetch_on_settle(mut self, refetch: bool) -> Self {
        for target in &mut self.targets {
            target.refetch_on_settle = refetch;
        }
        self
    }

    pub fn with_messages(mut self, pending: impl Into<String>, success: impl Into<String>) -> Self {
        self.pending_message = Some(pending.into());
        self.success_message = Some(success.into());
        self
    }

    pub fn queries(&self) -> impl Iterator<Item = &QueryDescriptor> {
        self.targets.iter().map(|t| &t.query)
    }
}
