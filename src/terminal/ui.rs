use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};

use crate::domain::Label;
use crate::mail::decoders::normalize_snippet;
use crate::session::{ClassifiedEmail, Session};
use crate::terminal::state::{AppState, ViewMode};

fn label_color(label: Label) -> Color {
    match label {
        Label::Important => Color::Green,
        Label::Junk => Color::Yellow,
    }
}

fn bold(s: impl Into<String>) -> Span<'static> {
    Span::styled(s.into(), Style::default().add_modifier(Modifier::BOLD))
}

fn status_line(c: &ClassifiedEmail) -> Line<'static> {
    let p = c.prediction;
    let mut spans = vec![
        Span::raw("   "),
        Span::styled(
            p.label.as_str().to_uppercase(),
            Style::default().fg(label_color(p.label)),
        ),
        Span::raw(format!(" ({:.1}%)", p.confidence * 100.0)),
    ];
    if let Some(label) = c.feedback {
        spans.push(Span::styled(
            format!("  [you: {label}]"),
            Style::default().fg(label_color(label)).add_modifier(Modifier::ITALIC),
        ));
    }
    Line::from(spans)
}

pub fn render(f: &mut Frame, state: &AppState, session: &Session) {
    let [header, main, prompt, status] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(f.area());

    let snapshot = session.coordinator().snapshot();
    let refreshing = if session.is_refreshing() { "  fetching..." } else { "" };
    f.render_widget(
        Paragraph::new(Line::from(vec![
            bold(" mail_triage "),
            Span::raw(format!(
                " classifier v{} ({}, {} terms){refreshing}",
                snapshot.version,
                session.phase(),
                snapshot.vocabulary.len()
            )),
        ])),
        header,
    );

    match state.mode {
        ViewMode::List => render_list(f, main, state, session),
        ViewMode::Detail(i) => render_detail(f, main, state, session, i),
    }

    let hint = match state.mode {
        ViewMode::List => " <n> open  i<n> important  j<n> junk  r refresh  q quit ",
        ViewMode::Detail(_) => " i important  j junk  b back ",
    };
    let input = Paragraph::new(Line::from(vec![bold("> "), Span::raw(state.input.clone())])).block(
        Block::default()
            .title(hint)
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(input, prompt);
    f.set_cursor_position((prompt.x + 3 + state.input.chars().count() as u16, prompt.y + 1));

    f.render_widget(
        Paragraph::new(Span::styled(state.status.clone(), Style::default().fg(Color::Gray))),
        status,
    );
}

fn render_list(f: &mut Frame, area: Rect, state: &AppState, session: &Session) {
    let block = Block::default().title(" Inbox ").borders(Borders::ALL);

    if session.emails().is_empty() {
        let msg = if session.is_refreshing() {
            "Fetching your latest emails..."
        } else {
            "No emails. Type r and Enter to fetch."
        };
        f.render_widget(Paragraph::new(msg).block(block), area);
        return;
    }

    let items: Vec<ListItem> = session
        .emails()
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let subject = Span::styled(
                format!("[{}] {}", i + 1, c.email.subject),
                Style::default()
                    .fg(label_color(c.prediction.label))
                    .add_modifier(Modifier::BOLD),
            );
            let from = Line::from(format!("   From: {}", c.email.sender));
            let snippet = Span::styled(
                format!("   {}", normalize_snippet(&c.email.body, 120)),
                Style::default().fg(Color::Gray),
            );
            ListItem::new(Text::from(vec![
                Line::from(subject),
                from,
                status_line(c),
                Line::from(snippet),
            ]))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_symbol("➜ ")
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(list, area, &mut state.list_state.clone());
}

fn render_detail(f: &mut Frame, area: Rect, state: &AppState, session: &Session, index: usize) {
    let Some(c) = session.email(index) else {
        return;
    };
    let [meta, summary, body] = Layout::vertical([
        Constraint::Length(5),
        Constraint::Length(8),
        Constraint::Min(0),
    ])
    .areas(area);

    let meta_text = Text::from(vec![
        Line::from(vec![bold("Subject: "), Span::raw(c.email.subject.clone())]),
        Line::from(vec![bold("From: "), Span::raw(c.email.sender.clone())]),
        status_line(c),
    ]);
    f.render_widget(
        Paragraph::new(meta_text).block(Block::default().borders(Borders::ALL)),
        meta,
    );

    let summary_text = session
        .summary(c.email.id)
        .map(str::to_string)
        .unwrap_or_else(|| "(no summary yet)".to_string());
    f.render_widget(
        Paragraph::new(summary_text)
            .wrap(Wrap { trim: false })
            .block(Block::default().title(" Summary ").borders(Borders::ALL)),
        summary,
    );

    f.render_widget(
        Paragraph::new(c.email.body.clone())
            .block(Block::default().title(" Full Email ").borders(Borders::ALL))
            .wrap(Wrap { trim: false })
            .scroll((state.body_scroll, 0)),
        body,
    );
}
