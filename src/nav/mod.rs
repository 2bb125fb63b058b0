pub mod focus;
pub mod keymap;
pub mod time_edit;

pub use focus::{Direction, FocusEffect, FocusMachine, Mode, NavCommand};
pub use keymap::{Command, command_for_key};
pub use time_edit::{TimeDraft, TimeField};
