use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::session::Session;
use crate::terminal::state::{AppState, ViewMode};

/// Apply one key press. Typed characters build a command that Enter submits;
/// arrows move the highlight (list) or scroll (detail).
pub fn handle_key(key: KeyEvent, state: &mut AppState, session: &mut Session) {
    if key.kind != KeyEventKind::Press {
        return;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        state.quit = true;
        return;
    }

    match key.code {
        KeyCode::Enter => state.submit(session),
        KeyCode::Backspace => {
            state.input.pop();
        }
        KeyCode::Esc => {
            if !state.input.is_empty() {
                state.input.clear();
            } else if matches!(state.mode, ViewMode::Detail(_)) {
                state.close();
            }
        }
        KeyCode::Char(c) => state.input.push(c),
        _ => match state.mode {
            ViewMode::List => handle_list_keys(key, state, session.emails().len()),
            ViewMode::Detail(_) => handle_detail_keys(key, state),
        },
    }
}

fn handle_list_keys(key: KeyEvent, state: &mut AppState, len: usize) {
    match key.code {
        KeyCode::Down => state.move_selection(1, len),
        KeyCode::Up => state.move_selection(-1, len),
        KeyCode::Home if len > 0 => state.list_state.select(Some(0)),
        KeyCode::End if len > 0 => state.list_state.select(Some(len - 1)),
        _ => {}
    }
}

fn handle_detail_keys(key: KeyEvent, state: &mut AppState) {
    match key.code {
        KeyCode::Down => state.scroll_body(1),
        KeyCode::Up => state.scroll_body(-1),
        KeyCode::PageDown => state.scroll_body(10),
        KeyCode::PageUp => state.scroll_body(-10),
        KeyCode::Home => state.body_scroll = 0,
        _ => {}
    }
}
