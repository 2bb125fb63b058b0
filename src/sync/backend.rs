use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::query::QueryDescriptor;
use crate::model::task::{Task, TaskId, TaskPatch};

use super::error::BackendError;
use super::mutation::WriteRequest;

/// Severity of a user-visible notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Fire-and-forget sink for user feedback
pub trait Notifier {
    fn notify(&self, severity: Severity, message: &str);
}

/// Persistence collaborator. Implementations own transport and retries.
#[async_trait(?Send)]
pub trait TaskBackend {
    async fn create(&self, task: &Task) -> Result<Task, BackendError>;
    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task, BackendError>;
    async fn delete(&self, id: &TaskId) -> Result<(), BackendError>;
    /// Reopen the most recently completed task, if any
    async fn undo_complete(&self) -> Result<Option<Task>, BackendError>;
}

/// Fetch collaborator: the server's current list for one view
#[async_trait(?Send)]
pub trait TaskFetcher {
    async fn fetch(&self, query: &QueryDescriptor) -> Result<Vec<Task>, BackendError>;
}

/// Route a write request to the matching backend call
pub async fn send<B>(backend: &B, request: &WriteRequest) -> Result<Option<Task>, BackendError>
where
    B: TaskBackend + ?Sized,
{
    match request {
        WriteRequest::Create { task } => backend.create(task).await.map(Some),
        WriteRequest::Update { id, patch } => backend.update(id, patch).await.map(Some),
        WriteRequest::Delete { id } => backend.delete(id).await.map(|()| None),
        WriteRequest::UndoComplete => backend.undo_complete().await,
    }
}
