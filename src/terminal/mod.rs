//! Full-screen interactive session.

pub mod command;
pub mod events;
pub mod state;
pub mod ui;

use std::time::Duration;

use color_eyre::eyre::Result;
use ratatui::DefaultTerminal;
use ratatui::crossterm::event::{self, Event};

use crate::session::Session;
use crate::terminal::state::AppState;

const TICK: Duration = Duration::from_millis(100);

/// Run the TUI until the user quits. The caller still owns `session` and is
/// responsible for finishing it.
pub fn run_tui(session: &mut Session) -> Result<()> {
    color_eyre::install()?;

    let mut state = AppState::new();
    session.start_refresh();
    state.status = "fetching your latest emails...".to_string();

    let terminal = ratatui::init();
    let result = run(terminal, &mut state, session);
    ratatui::restore();

    result
}

fn run(mut terminal: DefaultTerminal, state: &mut AppState, session: &mut Session) -> Result<()> {
    while !state.quit {
        while let Some(ev) = session.next_event(Duration::ZERO) {
            state.on_event(&ev);
        }
        session.reclassify_if_updated();

        terminal.draw(|f| ui::render(f, state, session))?;

        if event::poll(TICK)?
            && let Event::Key(key) = event::read()?
        {
            events::handle_key(key, state, session);
        }
    }
    Ok(())
}
