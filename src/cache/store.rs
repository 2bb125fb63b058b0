use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;

use crate::model::query::QueryDescriptor;
use crate::model::task::Task;

/// The store's record for one descriptor.
///
/// `tasks` is `None` until a fetch lands or an optimistic write creates the
/// list, which keeps "never loaded" distinct from "loaded, empty".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheEntry {
    tasks: Option<Vec<Task>>,
    stale: bool,
    fetching: bool,
    fetched_at: Option<DateTime<Utc>>,
    /// Bumped by every `set_data`; lets a late rollback notice that a fetch
    /// replaced the list it snapshotted
    generation: u64,
}

impl CacheEntry {
    pub fn tasks(&self) -> &[Task] {
        self.tasks.as_deref().unwrap_or(&[])
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of reading a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheRead<'a> {
    /// Nothing fetched or written yet; not the same as an empty list
    NotLoaded,
    Loaded { tasks: &'a [Task], stale: bool },
}

impl<'a> CacheRead<'a> {
    pub fn tasks(&self) -> Option<&'a [Task]> {
        match self {
            CacheRead::NotLoaded => None,
            CacheRead::Loaded { tasks, .. } => Some(tasks),
        }
    }
}

/// Descriptor → last known ordered task list.
///
/// All writes take `&mut self` and apply in call order. Readers get shared
/// borrows, so a snapshot can never change under them.
#[derive(Debug, Default)]
pub struct QueryStore {
    entries: IndexMap<QueryDescriptor, CacheEntry>,
}

impl QueryStore {
    pub fn new() -> Self {
        QueryStore::default()
    }

    /// The entry for `desc`, or `None` when no data exists for it yet
    pub fn get(&self, desc: &QueryDescriptor) -> Option<&CacheEntry> {
        self.entries.get(desc).filter(|e| e.tasks.is_some())
    }

    pub fn read(&self, desc: &QueryDescriptor) -> CacheRead<'_> {
        match self.get(desc) {
            Some(entry) => CacheRead::Loaded {
                tasks: entry.tasks(),
                stale: entry.stale,
            },
            None => CacheRead::NotLoaded,
        }
    }

    /// True when a read of `desc` should kick off a background refresh
    pub fn needs_fetch(&self, desc: &QueryDescriptor) -> bool {
        match self.entries.get(desc) {
            None => true,
            Some(e) => !e.fetching && (e.stale || e.tasks.is_none()),
        }
    }

    /// Replace the list wholesale with fetched data and mark it fresh
    pub fn set_data(&mut self, desc: &QueryDescriptor, tasks: Vec<Task>) {
        let entry = self.entries.entry(desc.clone()).or_default();
        entry.tasks = Some(tasks);
        entry.stale = false;
        entry.fetching = false;
        entry.fetched_at = Some(Utc::now());
        entry.generation += 1;
        debug!(query = %desc, count = entry.tasks().len(), "cache entry replaced");
    }

    /// Apply `projector` to the current list (empty when absent), commit the
    /// result and hand back the previous list. `None` means the entry had no
    /// data before this write.
    pub fn update_data<F>(&mut self, desc: &QueryDescriptor, projector: F) -> Option<Vec<Task>>
    where
        F: FnOnce(Vec<Task>) -> Vec<Task>,
    {
        let entry = self.entries.entry(desc.clone()).or_insert_with(|| CacheEntry {
            stale: true,
            ..Default::default()
        });
        let previous = entry.tasks.take();
        let next = projector(previous.clone().unwrap_or_default());
        entry.tasks = Some(next);
        previous
    }

    /// Mark stale; the data stays readable until the refresh lands
    pub fn invalidate(&mut self, desc: &QueryDescriptor) {
        if let Some(entry) = self.entries.get_mut(desc) {
            entry.stale = true;
        }
    }

    /// Drop the data of an entry, returning it to "not loaded". Only used to
    /// roll back an optimistic write into a descriptor that had no data.
    pub fn evict(&mut self, desc: &QueryDescriptor) {
        if let Some(entry) = self.entries.get_mut(desc) {
            entry.tasks = None;
            entry.stale = true;
        }
    }

    /// Mark a fetch in flight. Returns false when one already is.
    pub fn begin_fetch(&mut self, desc: &QueryDescriptor) -> bool {
        let entry = self.entries.entry(desc.clone()).or_default();
        if entry.fetching {
            return false;
        }
        entry.fetching = true;
        true
    }

    /// A fetch failed: clear the in-flight marker and keep the old data, stale
    pub fn fail_fetch(&mut self, desc: &QueryDescriptor) {
        if let Some(entry) = self.entries.get_mut(desc) {
            entry.fetching = false;
            entry.stale = true;
        }
    }

    pub fn generation(&self, desc: &QueryDescriptor) -> u64 {
        self.entries.get(desc).map_or(0, |e| e.generation)
    }

    /// Descriptors holding data, in first-touched order
    pub fn descriptors(&self) -> impl Iterator<Item = &QueryDescriptor> {
        self.entries
            .iter()
            .filter(|(_, e)| e.tasks.is_some())
            .map(|(d, _)| d)
    }
}
