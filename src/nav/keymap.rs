use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::focus::{Direction, Mode, NavCommand};

/// What a key press asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Nav(NavCommand),
    /// Reopen the most recently completed task
    UndoComplete,
}

/// `t` on a Korean 2-set layout
const HANGUL_T: char = 'ㅅ';
/// `z` on a Korean 2-set layout
const HANGUL_Z: char = 'ㅋ';

/// Ctrl on most terminals, Cmd where the terminal reports it
fn is_jump_modifier(modifiers: KeyModifiers) -> bool {
    modifiers.intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER)
}

/// Map a key event to a command for the current mode. Releases and keys
/// with no meaning in `mode` map to `None`.
pub fn command_for_key(mode: &Mode, key: KeyEvent) -> Option<Command> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match mode {
        Mode::Navigate => navigate_key(key),
        Mode::EditTime(_) => edit_time_key(key).map(Command::Nav),
    }
}

fn navigate_key(key: KeyEvent) -> Option<Command> {
    let direction = match key.code {
        KeyCode::Down => Direction::Forward,
        KeyCode::Up => Direction::Backward,
        KeyCode::Char('z' | 'Z' | HANGUL_Z) if is_jump_modifier(key.modifiers) => {
            return Some(Command::UndoComplete);
        }
        KeyCode::Char('t' | HANGUL_T) if key.modifiers.is_empty() => {
            return Some(Command::Nav(NavCommand::BeginEditTime));
        }
        _ => return None,
    };
    let command = if is_jump_modifier(key.modifiers) {
        NavCommand::JumpToGroupStart(direction)
    } else if key.modifiers.contains(KeyModifiers::ALT) {
        NavCommand::StepByTwo(direction)
    } else {
        match direction {
            Direction::Forward => NavCommand::FocusNext,
            Direction::Backward => NavCommand::FocusPrevious,
        }
    };
    Some(Command::Nav(command))
}

fn edit_time_key(key: KeyEvent) -> Option<NavCommand> {
    match (key.modifiers, key.code) {
        (_, KeyCode::Enter) => Some(NavCommand::CommitEditTime),
        (_, KeyCode::Esc) => Some(NavCommand::CancelEditTime),
        (_, KeyCode::Tab | KeyCode::BackTab) => Some(NavCommand::ToggleTimeField),
        (_, KeyCode::Backspace) => Some(NavCommand::Backspace),
        (KeyModifiers::NONE, KeyCode::Char('t' | HANGUL_T)) => Some(NavCommand::CommitEditTime),
        (_, KeyCode::Char(c)) if c.is_ascii_digit() => Some(NavCommand::TypeDigit(c)),
        _ => None,
    }
}
