use std::cell::RefCell;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cache::store::{CacheEntry, QueryStore};
use crate::io::recovery;
use crate::model::config::Config;
use crate::model::query::QueryDescriptor;
use crate::model::task::Task;
use crate::ops::ordering;

use super::backend::{self, Notifier, Severity, TaskBackend, TaskFetcher};
use super::engine::{MutationEngine, MutationOutcome, MutationStatus};
use super::error::{BackendError, SyncError};
use super::mutation::{PendingMutation, WriteRequest};

/// Drives the store and the mutation engine against the collaborators.
///
/// Single-threaded: the store and engine sit in `RefCell`s and no borrow is
/// held across an `.await`, so several `apply` futures can interleave on one
/// local executor and each still lands its rollback or reconciliation.
pub struct SyncClient<B, N> {
    backend: B,
    notifier: N,
    config: Config,
    store: RefCell<QueryStore>,
    engine: RefCell<MutationEngine>,
}

impl<B, N> SyncClient<B, N>
where
    B: TaskBackend + TaskFetcher,
    N: Notifier,
{
    pub fn new(backend: B, notifier: N, config: Config) -> Self {
        SyncClient {
            backend,
            notifier,
            config,
            store: RefCell::new(QueryStore::new()),
            engine: RefCell::new(MutationEngine::new()),
        }
    }

    /// Log rejected writes to `.recovery.log` under `dir`
    pub fn with_recovery_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.recovery.dir = Some(dir.into());
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current tasks for `query`; `NotLoaded` when nothing was fetched or
    /// written for it yet.
    pub fn tasks(&self, query: &QueryDescriptor) -> Result<Vec<Task>, SyncError> {
        self.store
            .borrow()
            .read(query)
            .tasks()
            .map(<[Task]>::to_vec)
            .ok_or_else(|| SyncError::NotLoaded(query.clone()))
    }

    pub fn entry(&self, query: &QueryDescriptor) -> Option<CacheEntry> {
        self.store.borrow().get(query).cloned()
    }

    /// Run `f` against the store without copying it
    pub fn with_store<R>(&self, f: impl FnOnce(&QueryStore) -> R) -> R {
        f(&self.store.borrow())
    }

    /// Seed an entry, e.g. with a list the caller already holds
    pub fn prime(&self, query: &QueryDescriptor, mut tasks: Vec<Task>) {
        ordering::sort_tasks(&mut tasks);
        self.receive(query, tasks);
    }

    /// Fetch `query` and replace its entry. Returns `Ok(false)` when a fetch
    /// for it is already in flight.
    pub async fn refresh(&self, query: &QueryDescriptor) -> Result<bool, BackendError> {
        if !self.store.borrow_mut().begin_fetch(query) {
            return Ok(false);
        }
        match self.backend.fetch(query).await {
            Ok(mut tasks) => {
                ordering::sort_tasks(&mut tasks);
                info!(query = %query, count = tasks.len(), "refreshed");
                self.receive(query, tasks);
                Ok(true)
            }
            Err(err) => {
                warn!(query = %query, error = %err, "refresh failed, keeping stale data");
                self.store.borrow_mut().fail_fetch(query);
                Err(err)
            }
        }
    }

    /// Fetch `query` unless it already holds fresh data
    pub async fn load(&self, query: &QueryDescriptor) -> Result<Vec<Task>, SyncError> {
        let needs_fetch = self.store.borrow().needs_fetch(query);
        if needs_fetch && let Err(err) = self.refresh(query).await {
            warn!(query = %query, error = %err, "load failed");
        }
        self.tasks(query)
    }

    /// Refresh every given descriptor that holds stale data. Fetch failures
    /// are logged and leave the entry stale.
    pub async fn refresh_stale(&self, queries: &[QueryDescriptor]) {
        for query in queries {
            let stale = self.store.borrow().get(query).is_some_and(CacheEntry::is_stale);
            if stale {
                let _ = self.refresh(query).await;
            }
        }
    }

    /// Apply `mutation` optimistically, send it, then settle it.
    ///
    /// The optimistic state is in the store before the first `.await`.
    /// A failure rolls every target back and notifies exactly once. Views
    /// left stale by settling are re-fetched before this returns.
    pub async fn apply(&self, mutation: PendingMutation) -> Result<MutationOutcome, SyncError> {
        let mutation = self.with_config_overrides(mutation);
        if let Some(message) = &mutation.pending_message {
            self.notifier.notify(Severity::Info, message);
        }
        let success_message = mutation.success_message.clone();

        let ticket = {
            let mut store = self.store.borrow_mut();
            self.engine.borrow_mut().begin(&mut store, mutation)
        };

        let result = backend::send(&self.backend, &ticket.request).await;

        let outcome = {
            let mut store = self.store.borrow_mut();
            self.engine.borrow_mut().settle(&mut store, ticket.id, result)?
        };

        match &outcome.status {
            MutationStatus::Confirmed(_) => {
                if self.config.notify.success_messages
                    && let Some(message) = &success_message
                {
                    self.notifier.notify(Severity::Success, message);
                }
            }
            MutationStatus::RolledBack(err) => {
                self.notifier
                    .notify(Severity::Error, &self.config.notify.failure_message);
                if let (Some(dir), SyncError::MutationRejected { source, .. }) =
                    (self.recovery_dir(), err)
                {
                    recovery::log_rejected_write(dir, &ticket.request, source);
                }
            }
        }
        if let Some(dir) = self.recovery_dir() {
            for mismatch in &outcome.mismatches {
                recovery::log_mismatch(dir, mismatch);
            }
        }

        self.refresh_stale(&outcome.stale).await;
        Ok(outcome)
    }

    pub fn pending(&self) -> usize {
        self.engine.borrow().pending()
    }

    /// Land fetched data; writes still in flight stay applied on top
    fn receive(&self, query: &QueryDescriptor, tasks: Vec<Task>) {
        let mut store = self.store.borrow_mut();
        self.engine.borrow_mut().receive(&mut store, query, tasks);
    }

    fn recovery_dir(&self) -> Option<&Path> {
        self.config.recovery.dir.as_deref()
    }

    fn with_config_overrides(&self, mutation: PendingMutation) -> PendingMutation {
        match mutation.request {
            WriteRequest::Create { .. } if !self.config.sync.refetch_on_create => {
                mutation.refetch_on_settle(false)
            }
            WriteRequest::Update { .. } if self.config.sync.refetch_on_update => {
                mutation.refetch_on_settle(true)
            }
            _ => mutation,
        }
    }
}
