//! Optimistic local cache, day/time ordering and keyboard focus for a
//! personal task inbox.
//!
//! Views of the task list are cached per [`QueryDescriptor`]. A
//! [`PendingMutation`] is projected into every view it touches before the
//! server answers, then reconciled or rolled back by the [`SyncClient`].
//! [`FocusMachine`] tracks keyboard focus over one ordered view.

pub mod cache;
pub mod cli;
pub mod io;
pub mod model;
pub mod nav;
pub mod ops;
pub mod sync;

pub use cache::{CacheEntry, CacheRead, Projector, QueryStore};
pub use model::{Config, QueryDescriptor, Task, TaskId, TaskPatch};
pub use nav::{FocusMachine, NavCommand};
pub use sync::{PendingMutation, SyncClient};
