use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cache::projector::{Projector, reconcile_record};
use crate::cache::store::QueryStore;
use crate::model::query::QueryDescriptor;
use crate::model::task::Task;

use super::error::{BackendError, SyncError};
use super::mutation::{MutationId, PendingMutation, TargetUpdate, WriteRequest};

/// One optimistic projection in a view's log
#[derive(Debug)]
struct JournalEntry {
    mutation: MutationId,
    projector: Projector,
    /// Set once the server accepted the write
    confirmed: bool,
    /// The server's copy of the placed record, swapped in on replay
    server: Option<Task>,
    /// Journal generation when the projection ran
    generation: u64,
}

impl JournalEntry {
    fn replay(&self, tasks: Vec<Task>) -> Vec<Task> {
        let mut tasks = self.projector.apply(tasks);
        if let (Some(server), Some(placed)) = (&self.server, self.projector.placed()) {
            reconcile_record(&mut tasks, &placed.id, server);
        }
        tasks
    }
}

/// The log behind one view: the list as the server last had it plus every
/// projection not yet folded into it, in dispatch order.
#[derive(Debug)]
struct Journal {
    /// `None` when the view had no data before the first projection
    base: Option<Vec<Task>>,
    /// Store generation `base` was taken at
    generation: u64,
    entries: Vec<JournalEntry>,
}

impl Journal {
    fn open(store: &QueryStore, query: &QueryDescriptor) -> Self {
        Journal {
            base: store.get(query).map(|e| e.tasks().to_vec()),
            generation: store.generation(query),
            entries: Vec::new(),
        }
    }

    /// Take fetched data as the new base. Returns true when it changed.
    fn rebase(&mut self, store: &QueryStore, query: &QueryDescriptor) -> bool {
        let generation = store.generation(query);
        if generation == self.generation {
            return false;
        }
        self.base = store.get(query).map(|e| e.tasks().to_vec());
        self.generation = generation;
        true
    }

    /// Fold the confirmed prefix into the base
    fn fold(&mut self) {
        let settled = self.entries.iter().take_while(|e| e.confirmed).count();
        for entry in self.entries.drain(..settled) {
            self.base = Some(entry.replay(self.base.take().unwrap_or_default()));
        }
    }

    /// Base plus every unfolded projection
    fn project(&self) -> Option<Vec<Task>> {
        self.entries.iter().fold(self.base.clone(), |state, entry| {
            Some(entry.replay(state.unwrap_or_default()))
        })
    }

    /// Write the projected list back to the store
    fn rebuild(&self, store: &mut QueryStore, query: &QueryDescriptor) {
        match self.project() {
            Some(tasks) => {
                store.update_data(query, |_| tasks);
            }
            None => store.evict(query),
        }
    }
}

#[derive(Debug)]
struct InFlight {
    request: WriteRequest,
    targets: Vec<TargetUpdate>,
}

/// Handle for a mutation whose write has not settled yet
#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: MutationId,
    pub request: WriteRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus {
    /// The server accepted the write; carries its record when it returns one
    Confirmed(Option<Task>),
    /// The write failed and every projection was undone
    RolledBack(SyncError),
}

/// What settling a mutation did to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub id: MutationId,
    pub status: MutationStatus,
    /// Views marked stale while settling; the caller should re-fetch them
    pub stale: Vec<QueryDescriptor>,
    /// Server records that could not be matched to their optimistic copy
    pub mismatches: Vec<SyncError>,
}

impl MutationOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.status, MutationStatus::Confirmed(_))
    }

    fn new(id: MutationId, status: MutationStatus) -> Self {
        MutationOutcome {
            id,
            status,
            stale: Vec::new(),
            mismatches: Vec::new(),
        }
    }

    fn mark_stale(&mut self, query: &QueryDescriptor) {
        if !self.stale.contains(query) {
            self.stale.push(query.clone());
        }
    }
}

/// Applies mutations to the store ahead of the server and settles them
/// afterwards.
///
/// Each touched view keeps a journal: the list as last confirmed plus the
/// projections still waiting on the server, in dispatch order. The cached
/// list is always that base with the journal replayed on top, so settling
/// one mutation (or a fetch landing) never drops another one's pending
/// effect. A rollback with nothing else pending restores the view exactly.
#[derive(Debug, Default)]
pub struct MutationEngine {
    next_id: u64,
    in_flight: HashMap<MutationId, InFlight>,
    journals: HashMap<QueryDescriptor, Journal>,
}

impl MutationEngine {
    pub fn new() -> Self {
        MutationEngine::default()
    }

    /// Project `mutation` into every target view. Returns before any I/O;
    /// reads from now on observe the optimistic state.
    pub fn begin(&mut self, store: &mut QueryStore, mutation: PendingMutation) -> Ticket {
        self.next_id += 1;
        let id = MutationId(self.next_id);

        for target in &mutation.targets {
            let Some(projector) = &target.projector else {
                continue;
            };
            let journal = self.journal(store, &target.query);
            journal.entries.push(JournalEntry {
                mutation: id,
                projector: projector.clone(),
                confirmed: false,
                server: None,
                generation: journal.generation,
            });
            store.update_data(&target.query, |tasks| projector.apply(tasks));
            debug!(
                mutation = %id,
                query = %target.query,
                projector = projector.kind(),
                "optimistic projection applied"
            );
        }

        self.in_flight.insert(
            id,
            InFlight {
                request: mutation.request.clone(),
                targets: mutation.targets,
            },
        );
        Ticket {
            id,
            request: mutation.request,
        }
    }

    /// Replace `query` with fetched data, then re-apply the projections
    /// still pending on it.
    pub fn receive(&mut self, store: &mut QueryStore, query: &QueryDescriptor, tasks: Vec<Task>) {
        store.set_data(query, tasks);
        if let Some(journal) = self.journals.get_mut(query) {
            journal.rebase(store, query);
            journal.rebuild(store, query);
            debug!(query = %query, pending = journal.entries.len(), "re-applied pending projections over fetch");
        }
    }

    /// Settle a mutation with the server's answer: reconcile on success,
    /// roll back on failure.
    pub fn settle(
        &mut self,
        store: &mut QueryStore,
        id: MutationId,
        result: Result<Option<Task>, BackendError>,
    ) -> Result<MutationOutcome, SyncError> {
        let flight = self
            .in_flight
            .remove(&id)
            .ok_or(SyncError::UnknownMutation(id))?;

        match result {
            Ok(server) => Ok(self.confirm(store, id, flight, server)),
            Err(err) => {
                warn!(mutation = %id, write = %flight.request.describe(), error = %err, "write failed, rolling back");
                let mut outcome = MutationOutcome::new(
                    id,
                    MutationStatus::RolledBack(SyncError::MutationRejected {
                        mutation: id,
                        source: err,
                    }),
                );
                for target in &flight.targets {
                    if target.projector.is_some() && !self.roll_back(store, id, &target.query) {
                        outcome.mark_stale(&target.query);
                    }
                }
                Ok(outcome)
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_pending(&self, id: MutationId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// The journal for `query`, opened on first use and rebased when the
    /// store was replaced behind the engine's back
    fn journal(&mut self, store: &mut QueryStore, query: &QueryDescriptor) -> &mut Journal {
        let journal = self
            .journals
            .entry(query.clone())
            .or_insert_with(|| Journal::open(store, query));
        if journal.rebase(store, query) {
            journal.rebuild(store, query);
        }
        journal
    }

    fn confirm(
        &mut self,
        store: &mut QueryStore,
        id: MutationId,
        flight: InFlight,
        server: Option<Task>,
    ) -> MutationOutcome {
        let mut outcome = MutationOutcome::new(id, MutationStatus::Confirmed(server.clone()));

        for target in &flight.targets {
            if target.projector.is_some() {
                self.confirm_view(store, id, &target.query, server.as_ref(), &mut outcome);
            }
            if target.refetch_on_settle {
                outcome.mark_stale(&target.query);
            }
        }
        for query in &outcome.stale {
            store.invalidate(query);
        }
        outcome
    }

    /// Mark mutation `id` confirmed in one view, swap in the server's record
    /// and rebuild the view with everything still pending on top.
    fn confirm_view(
        &mut self,
        store: &mut QueryStore,
        id: MutationId,
        query: &QueryDescriptor,
        server: Option<&Task>,
        outcome: &mut MutationOutcome,
    ) {
        if !self.journals.contains_key(query) {
            return;
        }
        let journal = self.journal(store, query);
        let Some(entry) = journal
            .entries
            .iter_mut()
            .find(|e| e.mutation == id && !e.confirmed)
        else {
            return;
        };
        entry.confirmed = true;

        let mut rekey = None;
        if let (Some(server), Some(placed)) = (server, entry.projector.placed())
            && placed != server
        {
            let present = store
                .get(query)
                .is_some_and(|e| e.tasks().iter().any(|t| t.id == placed.id));
            if present {
                debug!(mutation = %id, query = %query, from = %placed.id, to = %server.id, "reconciled");
                if placed.id != server.id {
                    rekey = Some((placed.id.clone(), server.id.clone()));
                }
                entry.server = Some(server.clone());
            } else {
                let err = SyncError::ReconciliationMismatch {
                    query: query.clone(),
                    id: server.id.clone(),
                };
                warn!(mutation = %id, error = %err, "marking view for re-fetch");
                outcome.mark_stale(query);
                outcome.mismatches.push(err);
            }
        }

        // Writes queued against a temporary id follow the record to its server id
        if let Some((from, to)) = &rekey {
            for later in journal.entries.iter_mut().filter(|e| !e.confirmed) {
                later.projector.rekey(from, to);
            }
        }
        journal.fold();
        journal.rebuild(store, query);
        if journal.entries.is_empty() {
            self.journals.remove(query);
        }
    }

    /// Undo mutation `id` in one view. Returns false when a fetch replaced
    /// the view since the projection ran; the view is then invalidated.
    fn roll_back(&mut self, store: &mut QueryStore, id: MutationId, query: &QueryDescriptor) -> bool {
        if !self.journals.contains_key(query) {
            return true;
        }
        let journal = self.journal(store, query);
        let Some(idx) = journal.entries.iter().position(|e| e.mutation == id) else {
            // Already rolled back through an earlier target on the same view
            return true;
        };
        let entry = journal.entries.remove(idx);
        let replayed = journal.entries.len() - idx;
        if replayed > 0 {
            debug!(mutation = %id, query = %query, replayed, "replaying later projections");
        }
        let fetched_since = entry.generation != journal.generation;

        journal.fold();
        journal.rebuild(store, query);
        if journal.entries.is_empty() {
            self.journals.remove(query);
        }
        if fetched_since {
            store.invalidate(query);
        }
        !fetched_since
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::{TaskId, TaskPatch};
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, d)
    }

    fn task(id: &str) -> Task {
        Task::new(
            TaskId::from(id),
            id,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_due(day(10))
    }

    fn ids(store: &QueryStore, q: &QueryDescriptor) -> Vec<String> {
        store
            .get(q)
            .map(|e| e.tasks().iter().map(|t| t.id.to_string()).collect())
            .unwrap_or_default()
    }

    fn rejected() -> Result<Option<Task>, BackendError> {
        Err(BackendError::Rejected("nope".into()))
    }

    fn seeded() -> (QueryStore, QueryDescriptor) {
        let mut store = QueryStore::new();
        let inbox = QueryDescriptor::inbox();
        store.set_data(&inbox, vec![task("a"), task("b"), task("c")]);
        (store, inbox)
    }

    #[test]
    fn test_begin_applies_before_settle() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let ticket = engine.begin(
            &mut store,
            PendingMutation::create_at_start(task("n"), &[inbox.clone()]),
        );
        assert_eq!(ids(&store, &inbox), vec!["n", "a", "b", "c"]);
        assert!(engine.is_pending(ticket.id));
        assert_eq!(engine.pending(), 1);
    }

    #[test]
    fn test_rollback_restores_entry_exactly() {
        let (mut store, inbox) = seeded();
        store.invalidate(&inbox);
        let before = store.get(&inbox).cloned();
        let mut engine = MutationEngine::new();

        let ticket = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("b"), &[inbox.clone()]),
        );
        assert_eq!(ids(&store, &inbox), vec!["a", "c"]);

        let outcome = engine.settle(&mut store, ticket.id, rejected()).unwrap();
        assert!(matches!(
            outcome.status,
            MutationStatus::RolledBack(SyncError::MutationRejected { .. })
        ));
        assert_eq!(store.get(&inbox).cloned(), before);
        assert!(outcome.stale.is_empty());
        assert_eq!(engine.pending(), 0);
    }

    #[test]
    fn test_rollback_into_previously_absent_view_evicts() {
        let mut store = QueryStore::new();
        let archive = QueryDescriptor::archive();
        let mut engine = MutationEngine::new();
        let ticket = engine.begin(
            &mut store,
            PendingMutation::create_at_start(task("n"), &[archive.clone()]),
        );
        assert_eq!(ids(&store, &archive), vec!["n"]);

        engine.settle(&mut store, ticket.id, rejected()).unwrap();
        assert!(store.get(&archive).is_none());
    }

    #[test]
    fn test_late_rollback_keeps_later_mutation() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();

        let first = engine.begin(
            &mut store,
            PendingMutation::create_at_start(task("x"), &[inbox.clone()]),
        );
        let second = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("a"), &[inbox.clone()]),
        );
        assert_eq!(ids(&store, &inbox), vec!["x", "b", "c"]);

        engine.settle(&mut store, first.id, rejected()).unwrap();
        assert_eq!(ids(&store, &inbox), vec!["b", "c"]);

        // The second mutation now rolls back to the rebased snapshot
        engine.settle(&mut store, second.id, rejected()).unwrap();
        assert_eq!(ids(&store, &inbox), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_confirm_then_rollback_of_later_mutation() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let first = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("a"), &[inbox.clone()]),
        );
        let second = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("b"), &[inbox.clone()]),
        );
        engine.settle(&mut store, first.id, Ok(None)).unwrap();
        engine.settle(&mut store, second.id, rejected()).unwrap();
        assert_eq!(ids(&store, &inbox), vec!["b", "c"]);
    }

    #[test]
    fn test_create_reconciles_temporary_id() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let draft = Task::draft("new").with_due(day(10));
        let temp_id = draft.id.clone();
        let ticket = engine.begin(
            &mut store,
            PendingMutation::create_at_start(draft.clone(), &[inbox.clone()]),
        );

        let mut saved = draft.clone();
        saved.id = TaskId::from("srv-1");
        let outcome = engine.settle(&mut store, ticket.id, Ok(Some(saved))).unwrap();

        let listed = ids(&store, &inbox);
        assert_eq!(listed[0], "srv-1");
        assert!(!listed.contains(&temp_id.to_string()));
        assert!(outcome.mismatches.is_empty());
        // Creates re-fetch their views once settled
        assert_eq!(outcome.stale, vec![inbox.clone()]);
        assert!(store.get(&inbox).unwrap().is_stale());
    }

    #[test]
    fn test_reconcile_repositions_when_server_normalizes_time() {
        let mut store = QueryStore::new();
        let inbox = QueryDescriptor::inbox();
        let t8 = task("t8").with_times(Some("0800".parse().unwrap()), None);
        let t12 = task("t12").with_times(Some("1200".parse().unwrap()), None);
        store.set_data(&inbox, vec![task("u"), t8, t12]);
        let mut engine = MutationEngine::new();

        let patch = TaskPatch::times(Some("0700".parse().unwrap()), None);
        let ticket = engine.begin(
            &mut store,
            PendingMutation::update(&task("u"), patch, &[inbox.clone()]),
        );
        assert_eq!(ids(&store, &inbox), vec!["u", "t8", "t12"]);

        // Server snapped the start to 1300
        let server = task("u").with_times(Some("1300".parse().unwrap()), None);
        let outcome = engine.settle(&mut store, ticket.id, Ok(Some(server))).unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(ids(&store, &inbox), vec!["t8", "t12", "u"]);
    }

    #[test]
    fn test_missing_optimistic_record_is_a_mismatch() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let draft = task("n");
        let create = engine.begin(
            &mut store,
            PendingMutation::create_at_end(draft.clone(), &[inbox.clone()]).refetch_on_settle(false),
        );
        // The user deletes the draft before the create lands
        let delete = engine.begin(
            &mut store,
            PendingMutation::delete(draft.id.clone(), &[inbox.clone()]).refetch_on_settle(false),
        );
        engine.settle(&mut store, delete.id, Ok(None)).unwrap();

        let mut saved = draft.clone();
        saved.id = TaskId::from("srv-9");
        let outcome = engine.settle(&mut store, create.id, Ok(Some(saved))).unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(outcome.stale, vec![inbox.clone()]);
        assert!(matches!(
            outcome.mismatches.as_slice(),
            [SyncError::ReconciliationMismatch { .. }]
        ));
        assert!(store.get(&inbox).unwrap().is_stale());
    }

    #[test]
    fn test_rollback_after_refetch_invalidates_instead() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let ticket = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("a"), &[inbox.clone()]),
        );
        store.set_data(&inbox, vec![task("b"), task("c")]);

        let outcome = engine.settle(&mut store, ticket.id, rejected()).unwrap();
        assert_eq!(outcome.stale, vec![inbox.clone()]);
        assert_eq!(ids(&store, &inbox), vec!["b", "c"]);
        assert!(store.get(&inbox).unwrap().is_stale());
    }

    #[test]
    fn test_settle_unknown_mutation_is_an_error() {
        let (mut store, _) = seeded();
        let mut engine = MutationEngine::new();
        let err = engine
            .settle(&mut store, MutationId(42), Ok(None))
            .unwrap_err();
        assert_eq!(err, SyncError::UnknownMutation(MutationId(42)));
    }

    #[test]
    fn test_confirm_keeps_later_pending_update() {
        let mut store = QueryStore::new();
        let inbox = QueryDescriptor::inbox();
        store.set_data(&inbox, vec![task("a"), task("b")]);
        let mut engine = MutationEngine::new();

        let rename = TaskPatch {
            name: Some("renamed".into()),
            ..TaskPatch::default()
        };
        let first = engine.begin(
            &mut store,
            PendingMutation::update(&task("a"), rename.clone(), &[inbox.clone()]),
        );
        let renamed = task("a").patched(&rename);
        let second = engine.begin(
            &mut store,
            PendingMutation::update(
                &renamed,
                TaskPatch::times(Some("0900".parse().unwrap()), None),
                &[inbox.clone()],
            ),
        );
        assert_eq!(ids(&store, &inbox), vec!["b", "a"]);

        // The server's copy of the first write differs from the optimistic one
        let mut server = renamed.clone();
        server.notes = "edited elsewhere".into();
        engine.settle(&mut store, first.id, Ok(Some(server))).unwrap();

        assert!(engine.is_pending(second.id));
        let listed = store.get(&inbox).unwrap().tasks().to_vec();
        assert_eq!(ids(&store, &inbox), vec!["b", "a"]);
        assert_eq!(listed[1].name, "renamed");
        assert_eq!(listed[1].start_time, Some("0900".parse().unwrap()));

        // Rolling the second write back lands on the server's copy of the first
        engine.settle(&mut store, second.id, rejected()).unwrap();
        let listed = store.get(&inbox).unwrap().tasks().to_vec();
        assert_eq!(ids(&store, &inbox), vec!["a", "b"]);
        assert_eq!(listed[0].notes, "edited elsewhere");
        assert_eq!(listed[0].start_time, None);
    }

    #[test]
    fn test_fetch_during_pending_delete_keeps_it_applied() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let ticket = engine.begin(
            &mut store,
            PendingMutation::delete(TaskId::from("a"), &[inbox.clone()]),
        );

        engine.receive(&mut store, &inbox, vec![task("a"), task("b")]);
        assert_eq!(ids(&store, &inbox), vec!["b"]);
        assert!(!store.get(&inbox).unwrap().is_stale());

        let outcome = engine.settle(&mut store, ticket.id, Ok(None)).unwrap();
        assert!(outcome.stale.is_empty());
        assert_eq!(ids(&store, &inbox), vec!["b"]);
    }

    #[test]
    fn test_fetch_without_pending_work_is_plain_replace() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        engine.receive(&mut store, &inbox, vec![task("z")]);
        assert_eq!(ids(&store, &inbox), vec!["z"]);
    }

    #[test]
    fn test_update_queued_against_temporary_id_follows_server_id() {
        let (mut store, inbox) = seeded();
        let mut engine = MutationEngine::new();
        let draft = Task::draft("new").with_due(day(10));
        let create = engine.begin(
            &mut store,
            PendingMutation::create_at_start(draft.clone(), &[inbox.clone()]).refetch_on_settle(false),
        );
        let rename = TaskPatch {
            name: Some("renamed".into()),
            ..TaskPatch::default()
        };
        let update = engine.begin(
            &mut store,
            PendingMutation::update(&draft, rename, &[inbox.clone()]),
        );

        let mut saved = draft.clone();
        saved.id = TaskId::from("srv-1");
        engine.settle(&mut store, create.id, Ok(Some(saved))).unwrap();
        assert_eq!(ids(&store, &inbox), vec!["srv-1", "a", "b", "c"]);
        assert_eq!(store.get(&inbox).unwrap().tasks()[0].name, "renamed");

        engine.settle(&mut store, update.id, rejected()).unwrap();
        assert_eq!(ids(&store, &inbox), vec!["srv-1", "a", "b", "c"]);
        assert_eq!(store.get(&inbox).unwrap().tasks()[0].name, "new");
    }
}
