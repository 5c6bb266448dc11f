//! Text commands typed at the prompt.
//!
//! Emails are numbered from 1 on screen; parsed commands carry 0-based
//! indices.

use crate::domain::Label;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListCommand {
    Open(usize),
    Label(usize, Label),
    Refresh,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailCommand {
    Label(Label),
    Back,
}

fn email_number(s: &str) -> Option<usize> {
    let n: usize = s.parse().ok()?;
    n.checked_sub(1)
}

/// `<n>`, `i<n>`, `j<n>`, `r` or `q`.
pub fn parse_list(input: &str) -> Result<ListCommand, String> {
    let input = input.trim().to_ascii_lowercase();
    let bad = || format!("unknown command '{input}' (try 1, i1, j1, r or q)");

    match input.as_str() {
        "r" => return Ok(ListCommand::Refresh),
        "q" => return Ok(ListCommand::Quit),
        "" => return Err(bad()),
        _ => {}
    }
    if let Some(i) = email_number(&input) {
        return Ok(ListCommand::Open(i));
    }

    let label = match input.chars().next() {
        Some('i') => Label::Important,
        Some('j') => Label::Junk,
        _ => return Err(bad()),
    };
    email_number(&input[1..])
        .map(|i| ListCommand::Label(i, label))
        .ok_or_else(bad)
}

/// `i`, `j` or `b`.
pub fn parse_detail(input: &str) -> Result<DetailCommand, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "i" => Ok(DetailCommand::Label(Label::Important)),
        "j" => Ok(DetailCommand::Label(Label::Junk)),
        "b" => Ok(DetailCommand::Back),
        other => Err(format!("unknown command '{other}' (try i, j or b)")),
    }
}
