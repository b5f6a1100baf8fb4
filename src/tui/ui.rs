//! Frame composition for the TUI

use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};
use ratatui::Frame;

use super::app::{App, View};
use super::{messages, sidebar};

pub fn render(frame: &mut Frame, app: &App) {
    match app.view {
        View::List => render_list(frame, app),
        View::Chat => render_chat(frame, app),
    }
}

fn render_list(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.area());

    let (list, mut state) = sidebar::thread_list(app.session.engine().store(), app.selected);
    frame.render_stateful_widget(list, chunks[0], &mut state);

    let help = match &app.notice {
        Some((text, _)) => Line::from(Span::styled(
            text.clone(),
            Style::default().fg(Color::Yellow),
        )),
        None => Line::from(Span::styled(
            " enter: open   n: new chat   j/k: move   q: quit",
            Style::default().fg(Color::DarkGray),
        )),
    };
    frame.render_widget(Paragraph::new(help), chunks[1]);
}

fn render_chat(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_transcript(frame, app, chunks[1]);
    render_status_row(frame, app, chunks[2]);
    render_footer(frame, app, chunks[3]);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let store = app.session.engine().store();
    let title = store
        .focused()
        .map(|t| {
            t.title
                .clone()
                .unwrap_or_else(|| "Conversation".to_string())
        })
        .unwrap_or_else(|| "Conversation".to_string());
    let header = Line::from(vec![
        Span::styled(format!(" {title}"), Style::default().add_modifier(Modifier::BOLD)),
        Span::styled("   esc: back", Style::default().fg(Color::DarkGray)),
    ]);
    frame.render_widget(Paragraph::new(header), area);
}

fn render_transcript(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let Some(thread) = app.session.engine().store().focused() else {
        return;
    };
    let lines = messages::transcript_lines(thread, inner.width);
    let total = lines.len() as u16;
    let offset = total
        .saturating_sub(inner.height)
        .saturating_sub(app.scroll_from_bottom);
    frame.render_widget(Paragraph::new(lines).scroll((offset, 0)), inner);
}

fn render_status_row(frame: &mut Frame, app: &App, area: Rect) {
    let line = if app.typing {
        Line::from(Span::styled(
            " agent is typing...",
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        ))
    } else if let Some((text, _)) = &app.notice {
        Line::from(Span::styled(
            format!(" {text}"),
            Style::default().fg(Color::Yellow),
        ))
    } else {
        Line::raw("")
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if let Some(form) = &app.form {
        let label = form
            .current_field()
            .map(|f| {
                let name = f.label.clone().unwrap_or_else(|| f.name.clone());
                if f.mandatory {
                    format!("{name}*")
                } else {
                    name
                }
            })
            .unwrap_or_default();
        let prompt = format!("{label}: ");
        let line = Line::from(vec![
            Span::styled(prompt.clone(), Style::default().fg(Color::Yellow)),
            Span::raw(form.input.value().to_string()),
        ]);
        frame.render_widget(Paragraph::new(line), inner);
        set_cursor(frame, inner, prompt.chars().count() + form.input.cursor());
        return;
    }

    if !app.input_enabled {
        let hint = match app.pending_question() {
            Some(q) if q.form().is_some() => " press Enter to fill in the form",
            Some(_) => " choose an option above (press 1-9)",
            None => " input unavailable",
        };
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                hint,
                Style::default().fg(Color::DarkGray),
            ))),
            inner,
        );
        return;
    }

    let line = Line::from(vec![
        Span::styled("> ", Style::default().fg(Color::Cyan)),
        Span::raw(app.compose.value().to_string()),
    ]);
    frame.render_widget(Paragraph::new(line), inner);
    set_cursor(frame, inner, 2 + app.compose.cursor());
}

fn set_cursor(frame: &mut Frame, inner: Rect, column: usize) {
    let x = inner.x + (column as u16).min(inner.width.saturating_sub(1));
    frame.set_cursor_position(Position::new(x, inner.y));
}
