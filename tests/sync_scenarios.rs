//! End-to-end scenarios for the optimistic cache: projection, move,
//! rollback and focus following the list.

use chrono::{NaiveDate, TimeZone, Utc};
use daybook::cache::store::QueryStore;
use daybook::model::config::Config;
use daybook::model::query::QueryDescriptor;
use daybook::model::task::{ClockTime, Task, TaskId, TaskPatch};
use daybook::nav::focus::{FocusEffect, FocusMachine, NavCommand};
use daybook::ops::ordering::{find_insertion_index, insert_sorted, is_timed};
use daybook::sync::backend::Severity;
use daybook::sync::client::SyncClient;
use daybook::sync::engine::{MutationEngine, MutationStatus};
use daybook::sync::error::{BackendError, SyncError};
use daybook::sync::memory::{MemoryBackend, RecordingNotifier};
use daybook::sync::mutation::PendingMutation;
use pretty_assertions::assert_eq;

fn day(d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2024, 1, d)
}

fn time(s: &str) -> Option<ClockTime> {
    Some(s.parse().unwrap())
}

fn task(id: &str, due: Option<NaiveDate>) -> Task {
    Task::new(
        TaskId::from(id),
        id,
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    )
    .with_due(due)
}

fn timed(id: &str, due: Option<NaiveDate>, start: &str) -> Task {
    task(id, due).with_times(time(start), None)
}

fn ids(tasks: &[Task]) -> Vec<&str> {
    tasks.iter().map(|t| t.id.as_str()).collect()
}

fn client(tasks: Vec<Task>) -> SyncClient<MemoryBackend, RecordingNotifier> {
    SyncClient::new(
        MemoryBackend::with_tasks(tasks),
        RecordingNotifier::new(),
        Config::default(),
    )
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[test]
fn test_untimed_insertions_keep_relative_order() {
    let mut list = Vec::new();
    for id in ["u1", "u2", "u3", "u4"] {
        insert_sorted(&mut list, task(id, day(10)));
    }
    insert_sorted(&mut list, timed("t1", day(10), "0900"));
    insert_sorted(&mut list, task("u5", day(10)));
    // Equal keys land in front of their equals, so order is stable by
    // insertion position rather than reshuffled
    assert_eq!(ids(&list), vec!["u5", "u4", "u3", "u2", "u1", "t1"]);
}

#[test]
fn test_insertion_index_identity_law() {
    let list = vec![
        task("a", day(9)),
        task("b", day(10)),
        timed("c", day(10), "0800"),
        timed("d", day(10), "1300"),
        task("e", None),
    ];
    for candidate in [
        task("x", day(10)),
        timed("y", day(10), "1000"),
        task("z", None),
        task("w", day(1)),
    ] {
        let idx = find_insertion_index(&list, &candidate);
        let mut grown = list.clone();
        grown.insert(idx, candidate);
        grown.remove(idx);
        assert_eq!(grown, list);
    }
}

// ---------------------------------------------------------------------------
// Projection scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_append_start_create_lands_first_and_untimed() {
    let dated_inbox = QueryDescriptor::new("/inbox").with_param("due", "2024-01-10");
    let mut store = QueryStore::new();
    store.set_data(&dated_inbox, vec![task("a", day(10)), task("b", day(10))]);
    let mut engine = MutationEngine::new();

    let draft = Task::draft("new").with_due(day(10));
    engine.begin(
        &mut store,
        PendingMutation::create_at_start(draft.clone(), &[dated_inbox.clone()]),
    );

    let tasks = store.read(&dated_inbox).tasks().unwrap();
    assert_eq!(tasks[0].id, draft.id);
    assert!(!is_timed(&tasks[0]));
    assert_eq!(tasks.len(), 3);
}

#[tokio::test]
async fn test_setting_start_time_relocates_into_timed_section() {
    let client = client(vec![
        task("u1", day(10)),
        task("u2", day(10)),
        timed("t8", day(10), "0800"),
        timed("t10", day(10), "1000"),
    ]);
    let inbox = QueryDescriptor::inbox();
    let before = client.load(&inbox).await.unwrap();
    assert_eq!(ids(&before), vec!["u1", "u2", "t8", "t10"]);

    let outcome = client
        .apply(PendingMutation::update(
            &before[0],
            TaskPatch::times(time("0900"), None),
            &[inbox.clone()],
        ))
        .await
        .unwrap();

    assert!(outcome.is_confirmed());
    let after = client.tasks(&inbox).unwrap();
    assert_eq!(ids(&after), vec!["u2", "t8", "u1", "t10"]);
    assert_eq!(after[2].end_time, time("0900"));
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

async fn two_buckets() -> (
    SyncClient<MemoryBackend, RecordingNotifier>,
    QueryDescriptor,
    QueryDescriptor,
) {
    let client = client(vec![
        task("a", day(10)),
        task("b", day(10)),
        task("c", day(11)),
        task("d", day(11)),
    ]);
    let from = QueryDescriptor::day_bucket(day(10), false);
    let to = QueryDescriptor::day_bucket(day(11), false);
    client.load(&from).await.unwrap();
    client.load(&to).await.unwrap();
    (client, from, to)
}

#[tokio::test]
async fn test_move_removes_from_source_and_inserts_sorted() {
    let (client, from, to) = two_buckets().await;
    let b = client.tasks(&from).unwrap()[1].clone();

    let outcome = client
        .apply(PendingMutation::update_and_move(
            &b,
            TaskPatch::due(day(11)),
            from.clone(),
        ))
        .await
        .unwrap();

    assert!(outcome.is_confirmed());
    assert_eq!(ids(&client.tasks(&from).unwrap()), vec!["a"]);
    // Untimed tasks compare equal, so the newcomer goes to the front
    assert_eq!(ids(&client.tasks(&to).unwrap()), vec!["b", "c", "d"]);
}

#[tokio::test]
async fn test_move_into_timed_bucket_sorts_by_start() {
    let client = client(vec![
        task("a", day(10)),
        timed("t7", day(10), "0700"),
        timed("t9", day(10), "0900"),
    ]);
    let untimed = QueryDescriptor::day_bucket(day(10), false);
    let timed_bucket = QueryDescriptor::day_bucket(day(10), true);
    client.load(&untimed).await.unwrap();
    client.load(&timed_bucket).await.unwrap();

    let a = client.tasks(&untimed).unwrap()[0].clone();
    client
        .apply(PendingMutation::update_and_move(
            &a,
            TaskPatch::times(time("0800"), None),
            untimed.clone(),
        ))
        .await
        .unwrap();

    assert!(client.tasks(&untimed).unwrap().is_empty());
    assert_eq!(ids(&client.tasks(&timed_bucket).unwrap()), vec!["t7", "a", "t9"]);
}

#[tokio::test]
async fn test_move_to_same_bucket_is_a_no_op() {
    let (client, from, to) = two_buckets().await;
    let before_from = client.entry(&from);
    let before_to = client.entry(&to);
    let a = client.tasks(&from).unwrap()[0].clone();

    let outcome = client
        .apply(PendingMutation::update_and_move(
            &a,
            TaskPatch::due(day(10)),
            from.clone(),
        ))
        .await
        .unwrap();

    assert!(outcome.is_confirmed());
    assert_eq!(client.entry(&from), before_from);
    assert_eq!(client.entry(&to), before_to);
    // The write still reached the server
    assert_eq!(client.backend().write_count(), 1);
}

#[tokio::test]
async fn test_failed_move_restores_both_entries() {
    let (client, from, to) = two_buckets().await;
    let before_from = client.entry(&from);
    let before_to = client.entry(&to);
    let b = client.tasks(&from).unwrap()[1].clone();

    client
        .backend()
        .fail_next_write(BackendError::Transport("connection reset".into()));
    let outcome = client
        .apply(PendingMutation::update_and_move(
            &b,
            TaskPatch::due(day(11)),
            from.clone(),
        ))
        .await
        .unwrap();

    assert!(matches!(
        outcome.status,
        MutationStatus::RolledBack(SyncError::MutationRejected { .. })
    ));
    assert_eq!(client.entry(&from), before_from);
    assert_eq!(client.entry(&to), before_to);
    assert_eq!(client.notifier().count(Severity::Error), 1);
    assert_eq!(client.pending(), 0);
}

// ---------------------------------------------------------------------------
// Rollback
// ---------------------------------------------------------------------------

#[test]
fn test_rollback_is_field_for_field() {
    let inbox = QueryDescriptor::inbox();
    let mut store = QueryStore::new();
    store.set_data(
        &inbox,
        vec![task("a", day(10)), timed("b", day(10), "0900"), task("c", None)],
    );
    store.invalidate(&inbox);
    let before = store.get(&inbox).cloned();
    let mut engine = MutationEngine::new();

    let mutations = [
        PendingMutation::create_at_start(Task::draft("n"), &[inbox.clone()]),
        PendingMutation::create_at_end(Task::draft("n"), &[inbox.clone()]),
        PendingMutation::update(
            &task("a", day(10)),
            TaskPatch::times(time("1200"), None),
            &[inbox.clone()],
        ),
        PendingMutation::delete(TaskId::from("b"), &[inbox.clone()]),
    ];
    for mutation in mutations {
        let ticket = engine.begin(&mut store, mutation);
        assert_ne!(store.get(&inbox).cloned(), before);
        engine
            .settle(
                &mut store,
                ticket.id,
                Err(BackendError::Rejected("no".into())),
            )
            .unwrap();
        assert_eq!(store.get(&inbox).cloned(), before);
    }
}

#[test]
fn test_late_failure_does_not_erase_later_mutation() {
    let inbox = QueryDescriptor::inbox();
    let mut store = QueryStore::new();
    store.set_data(&inbox, vec![task("a", day(10)), task("b", day(10))]);
    let mut engine = MutationEngine::new();

    let rename = TaskPatch {
        name: Some("renamed".into()),
        ..Default::default()
    };
    let first = engine.begin(
        &mut store,
        PendingMutation::update(&task("a", day(10)), rename, &[inbox.clone()]),
    );
    let second = engine.begin(
        &mut store,
        PendingMutation::delete(TaskId::from("b"), &[inbox.clone()]),
    );

    engine
        .settle(&mut store, first.id, Err(BackendError::Rejected("no".into())))
        .unwrap();
    let tasks = store.read(&inbox).tasks().unwrap().to_vec();
    assert_eq!(ids(&tasks), vec!["a"]);
    assert_eq!(tasks[0].name, "a");

    engine.settle(&mut store, second.id, Ok(None)).unwrap();
    assert_eq!(engine.pending(), 0);
}

// ---------------------------------------------------------------------------
// Focus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_focus_follows_deleted_task_to_lower_neighbour() {
    let client = client(vec![
        task("t1", day(10)),
        task("t2", day(10)),
        task("t3", day(10)),
    ]);
    let inbox = QueryDescriptor::inbox();
    let tasks = client.load(&inbox).await.unwrap();
    let mut focus = FocusMachine::new(60).with_tasks(tasks);
    focus.handle(NavCommand::FocusNext);
    assert_eq!(focus.focused().map(TaskId::as_str), Some("t2"));

    client
        .apply(PendingMutation::delete(TaskId::from("t2"), &[inbox.clone()]))
        .await
        .unwrap();
    focus.handle(NavCommand::ListChanged(client.tasks(&inbox).unwrap()));

    assert_eq!(focus.focused().map(TaskId::as_str), Some("t1"));
}

#[tokio::test]
async fn test_time_edit_commit_round_trips_through_the_cache() {
    let client = client(vec![task("t1", day(10)), timed("t2", day(10), "1000")]);
    let inbox = QueryDescriptor::inbox();
    let mut focus = FocusMachine::new(60).with_tasks(client.load(&inbox).await.unwrap());

    focus.handle(NavCommand::BeginEditTime);
    for c in "1100".chars() {
        focus.handle(NavCommand::TypeDigit(c));
    }
    let Some(FocusEffect::UpdateTimes { task: edited, patch }) =
        focus.handle(NavCommand::CommitEditTime)
    else {
        panic!("expected an update");
    };
    client
        .apply(PendingMutation::update(&edited, patch, &[inbox.clone()]))
        .await
        .unwrap();
    focus.handle(NavCommand::ListChanged(client.tasks(&inbox).unwrap()));

    let tasks = client.tasks(&inbox).unwrap();
    assert_eq!(ids(&tasks), vec!["t2", "t1"]);
    assert_eq!(tasks[1].end_time, time("1200"));
    assert_eq!(focus.focused().map(TaskId::as_str), Some("t1"));
}
