use ratatui::widgets::ListState;

use crate::domain::Label;
use crate::reconcile::ReconcileResult;
use crate::session::{Session, SessionEvent};
use crate::terminal::command::{self, DetailCommand, ListCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    List,
    /// Index of the opened email.
    Detail(usize),
}

pub struct AppState {
    pub list_state: ListState,
    pub mode: ViewMode,
    pub body_scroll: u16,
    /// Command being typed.
    pub input: String,
    /// Last outcome shown under the prompt.
    pub status: String,
    pub quit: bool,
}

impl AppState {
    pub fn new() -> Self {
        let mut s = Self {
            list_state: ListState::default(),
            mode: ViewMode::List,
            body_scroll: 0,
            input: String::new(),
            status: String::new(),
            quit: false,
        };
        s.list_state.select(Some(0));
        s
    }

    pub fn move_selection(&mut self, delta: i32, len: usize) {
        if len == 0 {
            self.list_state.select(None);
            return;
        }
        let cur = self.list_state.selected().unwrap_or(0) as i32;
        let next = (cur + delta).clamp(0, len as i32 - 1) as usize;
        self.list_state.select(Some(next));
    }

    pub fn scroll_body(&mut self, delta: i32) {
        if delta < 0 {
            self.body_scroll = self.body_scroll.saturating_sub((-delta) as u16);
        } else {
            self.body_scroll = self.body_scroll.saturating_add(delta as u16);
        }
    }

    pub fn open(&mut self, session: &mut Session, index: usize) {
        if session.email(index).is_none() {
            self.status = format!("no email numbered {}", index + 1);
            return;
        }
        self.mode = ViewMode::Detail(index);
        self.body_scroll = 0;
        self.list_state.select(Some(index));
        if session.request_summary(index).is_ok() {
            self.status = "summarizing...".to_string();
        }
    }

    pub fn close(&mut self) {
        self.mode = ViewMode::List;
        self.body_scroll = 0;
    }

    fn label(&mut self, session: &mut Session, index: usize, label: Label) {
        self.status = match session.label(index, label) {
            Ok(_) => format!("email {} marked {label}; training on it", index + 1),
            Err(e) => e.to_string(),
        };
    }

    /// Run the command in `self.input` against the current view.
    pub fn submit(&mut self, session: &mut Session) {
        let input = std::mem::take(&mut self.input);
        match self.mode {
            ViewMode::List => {
                // Enter on an empty prompt opens the highlighted email.
                if input.trim().is_empty() {
                    if let Some(i) = self.list_state.selected() {
                        self.open(session, i);
                    }
                    return;
                }
                match command::parse_list(&input) {
                    Ok(ListCommand::Open(i)) => self.open(session, i),
                    Ok(ListCommand::Label(i, label)) => self.label(session, i, label),
                    Ok(ListCommand::Refresh) => {
                        session.start_refresh();
                        self.status = "fetching...".to_string();
                    }
                    Ok(ListCommand::Quit) => self.quit = true,
                    Err(msg) => self.status = msg,
                }
            }
            ViewMode::Detail(index) => match command::parse_detail(&input) {
                Ok(DetailCommand::Label(label)) => {
                    self.label(session, index, label);
                    self.close();
                }
                Ok(DetailCommand::Back) => self.close(),
                Err(msg) => self.status = msg,
            },
        }
    }

    /// Fold a background completion into the status line.
    pub fn on_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Refreshed { count } => {
                self.close();
                self.list_state.select(if *count == 0 { None } else { Some(0) });
                self.status = format!("{count} emails");
            }
            SessionEvent::RefreshFailed(e) => self.status = format!("refresh failed: {e}"),
            SessionEvent::Summary { result: Err(e), .. } => {
                self.status = format!("no summary: {e}");
            }
            SessionEvent::Summary { result: Ok(_), .. } => self.status.clear(),
            SessionEvent::Reconciled { id, label, result } => match result {
                ReconcileResult::Applied => {
                    self.status = format!("mailbox updated: UID {id} is {label}");
                }
                ReconcileResult::AlreadyApplied => {}
                ReconcileResult::SoftFailure { errors } => {
                    self.status = format!(
                        "label saved locally; mailbox update failed ({})",
                        errors.first().map(|e| e.to_string()).unwrap_or_default()
                    );
                }
            },
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
