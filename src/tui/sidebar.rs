//! Thread list pane

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, List, ListItem, ListState};

use crate::engine::store::ThreadStore;

/// Build the thread list widget plus its selection state.
pub fn thread_list(store: &ThreadStore, selected: usize) -> (List<'static>, ListState) {
    let items: Vec<ListItem> = store
        .threads()
        .iter()
        .map(|thread| {
            let title = thread
                .title
                .clone()
                .unwrap_or_else(|| "Conversation".to_string());
            let mut header: Vec<Span> = vec![Span::styled(
                title,
                Style::default().add_modifier(Modifier::BOLD),
            )];
            if thread.unread > 0 {
                header.push(Span::styled(
                    format!("  ({})", thread.unread),
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                ));
            }
            if thread.closed {
                header.push(Span::styled(
                    "  [ended]".to_string(),
                    Style::default().fg(Color::DarkGray),
                ));
            }

            let mut lines = vec![Line::from(header)];
            if let Some(created) = thread.created_at {
                lines.push(Line::from(Span::styled(
                    created.format("%Y-%m-%d %H:%M").to_string(),
                    Style::default().fg(Color::DarkGray),
                )));
            }
            let preview = thread
                .preview
                .clone()
                .unwrap_or_else(|| "No preview available".to_string());
            lines.push(Line::from(Span::styled(
                truncate(&preview, 48),
                Style::default().fg(Color::Gray),
            )));
            ListItem::new(lines)
        })
        .collect();

    let list = List::new(items)
        .block(
            Block::default()
                .title(" Conversations ")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded),
        )
        .highlight_style(Style::default().bg(Color::DarkGray));

    let mut state = ListState::default();
    if !store.threads().is_empty() {
        state.select(Some(selected.min(store.threads().len() - 1)));
    }
    (list, state)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut)
}
