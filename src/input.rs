use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    Down,
    Up,
    Top,
    Bottom,
    Refresh,
    Delete,
    ReEnable,
    ReRun,
    NextNamespace,
    ToggleAllNamespaces,
    ConfirmYes,
    ConfirmNo,
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Quit);
    }

    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Confirm => map_confirm_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') if key.modifiers.is_empty() => Some(Action::Down),
        KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') if key.modifiers.is_empty() => Some(Action::Up),
        KeyCode::Up => Some(Action::Up),
        KeyCode::Char('g') | KeyCode::Home => Some(Action::Top),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Char('R') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('d') if key.modifiers.is_empty() => Some(Action::Delete),
        KeyCode::Delete => Some(Action::Delete),
        KeyCode::Char('e') if key.modifiers.is_empty() => Some(Action::ReEnable),
        KeyCode::Char('r') if key.modifiers.is_empty() => Some(Action::ReRun),
        KeyCode::Tab => Some(Action::NextNamespace),
        KeyCode::Char('a') if key.modifiers.is_empty() => Some(Action::ToggleAllNamespaces),
        _ => None,
    }
}

fn map_confirm_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => Some(Action::ConfirmYes),
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => Some(Action::ConfirmNo),
        _ => None,
    }
}
