pub mod backend;
pub mod client;
pub mod engine;
pub mod error;
pub mod memory;
pub mod mutation;

pub use backend::{Notifier, Severity, TaskBackend, TaskFetcher};
pub use client::SyncClient;
pub use engine::{MutationEngine, MutationOutcome, MutationStatus, Ticket};
pub use error::{BackendError, SyncError};
pub use memory::{MemoryBackend, RecordingNotifier};
pub use mutation::{MutationId, PendingMutation, TargetUpdate, WriteRequest};
