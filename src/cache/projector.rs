use std::fmt;
use std::rc::Rc;

use crate::model::task::{Task, TaskId};
use crate::ops::ordering;

/// A caller-supplied projection for composite changes
pub type ProjectFn = dyn Fn(Vec<Task>) -> Vec<Task>;

/// How one mutation rewrites one cache entry.
///
/// Every variant is safe to apply twice: placing a task first drops any
/// record with the same id. Rollback replays later projections on top of a
/// restored snapshot and relies on that.
#[derive(Clone)]
pub enum Projector {
    /// New task at the top of the list
    AppendStart(Task),
    /// New task at the bottom of the list
    AppendEnd(Task),
    /// Replace the record with the same id. Stays in place unless its day or
    /// times changed, in which case it is re-inserted in sorted position.
    Update(Task),
    /// Remove by id
    Delete(TaskId),
    /// Insert at the position `compare_tasks` dictates
    InsertSorted(Task),
    Custom(Rc<ProjectFn>),
}

impl Projector {
    pub fn custom(f: impl Fn(Vec<Task>) -> Vec<Task> + 'static) -> Self {
        Projector::Custom(Rc::new(f))
    }

    pub fn apply(&self, mut tasks: Vec<Task>) -> Vec<Task> {
        match self {
            Projector::AppendStart(task) => {
                tasks.retain(|t| t.id != task.id);
                tasks.insert(0, task.clone());
                tasks
            }
            Projector::AppendEnd(task) => {
                tasks.retain(|t| t.id != task.id);
                tasks.push(task.clone());
                tasks
            }
            Projector::Update(task) => {
                replace_record(&mut tasks, &task.id, task);
                tasks
            }
            Projector::Delete(id) => {
                tasks.retain(|t| &t.id != id);
                tasks
            }
            Projector::InsertSorted(task) => {
                tasks.retain(|t| t.id != task.id);
                ordering::insert_sorted(&mut tasks, task.clone());
                tasks
            }
            Projector::Custom(f) => f(tasks),
        }
    }

    /// The record this projection writes into the entry, if it writes one
    pub fn placed(&self) -> Option<&Task> {
        match self {
            Projector::AppendStart(task)
            | Projector::AppendEnd(task)
            | Projector::Update(task)
            | Projector::InsertSorted(task) => Some(task),
            Projector::Delete(_) | Projector::Custom(_) => None,
        }
    }

    /// Point this projection at `to` wherever it names `from`. Used once a
    /// create confirms and its temporary id is replaced by the server's.
    pub fn rekey(&mut self, from: &TaskId, to: &TaskId) {
        match self {
            Projector::AppendStart(task)
            | Projector::AppendEnd(task)
            | Projector::Update(task)
            | Projector::InsertSorted(task) => {
                if &task.id == from {
                    task.id = to.clone();
                }
            }
            Projector::Delete(id) => {
                if id == from {
                    *id = to.clone();
                }
            }
            Projector::Custom(_) => {}
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Projector::AppendStart(_) => "append_start",
            Projector::AppendEnd(_) => "append_end",
            Projector::Update(_) => "update",
            Projector::Delete(_) => "delete",
            Projector::InsertSorted(_) => "insert_sorted",
            Projector::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projector::Delete(id) => write!(f, "Delete({})", id),
            Projector::Custom(_) => f.write_str("Custom(..)"),
            other => match other.placed() {
                Some(task) => write!(f, "{}({})", other.kind(), task.id),
                None => f.write_str(other.kind()),
            },
        }
    }
}

/// Swap the record `id` for `next`. Position is kept when the slot (day and
/// times) is unchanged, otherwise the record moves to its sorted position.
/// Returns false when no record has that id.
pub fn replace_record(tasks: &mut Vec<Task>, id: &TaskId, next: &Task) -> bool {
    let Some(idx) = tasks.iter().position(|t| &t.id == id) else {
        return false;
    };
    if tasks[idx].same_slot(next) {
        tasks[idx] = next.clone();
    } else {
        tasks.remove(idx);
        ordering::insert_sorted(tasks, next.clone());
    }
    true
}

/// Put the server's copy of a record in place of the optimistic one.
/// When the list already holds the server id (a fetch landed first) the
/// optimistic copy is dropped instead of duplicated.
pub fn reconcile_record(tasks: &mut Vec<Task>, optimistic: &TaskId, server: &Task) -> bool {
    if optimistic != &server.id && tasks.iter().any(|t| t.id == server.id) {
        tasks.retain(|t| &t.id != optimistic);
        return replace_record(tasks, &server.id, server);
    }
    replace_record(tasks, optimistic, server)
}
