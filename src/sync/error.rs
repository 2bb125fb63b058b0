use crate::model::query::QueryDescriptor;
use crate::model::task::TaskId;

use super::mutation::MutationId;

/// Failure reported by the persistence or fetch collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("server rejected the write: {0}")]
    Rejected(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("task not found: {0}")]
    NotFound(TaskId),
}

/// Error type for the sync layer. None of these cross the store API; the
/// engine turns them into rollback or refetch actions and reports them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("mutation {mutation} rejected: {source}")]
    MutationRejected {
        mutation: MutationId,
        #[source]
        source: BackendError,
    },
    #[error("server record {id} has no optimistic counterpart in {query}")]
    ReconciliationMismatch { query: QueryDescriptor, id: TaskId },
    #[error("no data loaded yet for {0}")]
    NotLoaded(QueryDescriptor),
    #[error("unknown mutation {0}")]
    UnknownMutation(MutationId),
}
