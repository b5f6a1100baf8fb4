//! Transcript pane: projects one thread's message list into styled lines.
//!
//! Pure projection — every flag it renders (`answered`, `hidden`,
//! `selected_option`, `failed`) lives on the message entities; nothing is
//! read back out of the rendered output.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use unicode_width::UnicodeWidthStr;

use crate::engine::store::ThreadState;
use crate::models::{Media, Message};

/// Build the visible transcript as styled lines, wrapped to `width`.
pub fn transcript_lines(thread: &ThreadState, width: u16) -> Vec<Line<'static>> {
    let width = width.max(10) as usize;
    let mut lines = Vec::new();

    for msg in thread.messages.iter().filter(|m| !m.hidden) {
        lines.extend(message_lines(msg, width));
        lines.push(Line::raw(""));
    }
    lines
}

fn message_lines(msg: &Message, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let outgoing = msg.is_outbound();
    let body_style = if outgoing {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    };

    let mut header = vec![Span::styled(
        if outgoing { "you" } else { "agent" }.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    header.push(Span::styled(
        format!("  {}", msg.created_at.format("%H:%M")),
        Style::default().fg(Color::DarkGray),
    ));
    if msg.failed {
        header.push(Span::styled(
            "  ! not sent".to_string(),
            Style::default().fg(Color::Red),
        ));
    }
    lines.push(align(Line::from(header), outgoing, width));

    // Interactive media takes precedence over auxiliary text.
    let has_form = msg.form().is_some();
    if let Some(text) = msg.text.as_deref().filter(|t| !t.trim().is_empty()) {
        if !has_form {
            for wrapped in wrap(text, width.saturating_sub(4)) {
                lines.push(align(
                    Line::from(Span::styled(wrapped, body_style)),
                    outgoing,
                    width,
                ));
            }
        }
    }

    for media in &msg.media {
        match media {
            Media::Form(form) => {
                let title = form.title.clone().unwrap_or_else(|| "Form".to_string());
                let state = if msg.answered { "submitted" } else { "fill with Enter" };
                lines.push(Line::from(Span::styled(
                    format!("[form] {} ({})", title, state),
                    Style::default().fg(Color::Yellow),
                )));
                for field in &form.fields {
                    let label = field.label.clone().unwrap_or_else(|| field.name.clone());
                    let marker = if field.mandatory { "*" } else { "" };
                    let value = field.value.clone().unwrap_or_else(|| "…".to_string());
                    lines.push(Line::raw(format!("  {}{}: {}", label, marker, value)));
                }
            }
            Media::QuickReplies(qr) => {
                let mut spans: Vec<Span> = Vec::new();
                for (i, opt) in qr.options.iter().enumerate() {
                    let selected =
                        msg.selected_option.as_deref() == Some(opt.identifier.as_str());
                    let style = if selected {
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD)
                    } else if msg.answered {
                        Style::default().fg(Color::DarkGray)
                    } else {
                        Style::default().fg(Color::Blue)
                    };
                    let marker = if selected { "*" } else { "" };
                    spans.push(Span::styled(
                        format!("[{}] {}{}  ", i + 1, opt.title, marker),
                        style,
                    ));
                }
                lines.push(Line::from(spans));
            }
            Media::Attachment(att) => {
                let name = att
                    .file_name
                    .clone()
                    .or_else(|| att.url.clone())
                    .unwrap_or_else(|| "attachment".to_string());
                lines.push(align(
                    Line::from(Span::styled(
                        format!("[{}] {}", att.content_type, name),
                        Style::default().fg(Color::Magenta),
                    )),
                    outgoing,
                    width,
                ));
            }
        }
    }
    lines
}

/// Right-align outgoing lines by left-padding to the pane width.
fn align(line: Line<'static>, outgoing: bool, width: usize) -> Line<'static> {
    if !outgoing {
        return line;
    }
    let used: usize = line.spans.iter().map(|s| s.content.width()).sum();
    let pad = width.saturating_sub(used);
    if pad == 0 {
        return line;
    }
    let mut spans = vec![Span::raw(" ".repeat(pad))];
    spans.extend(line.spans);
    Line::from(spans)
}

/// Greedy word wrap on display width.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for raw_line in text.lines() {
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            let candidate_width = if current.is_empty() {
                word.width()
            } else {
                current.width() + 1 + word.width()
            };
            if candidate_width > width && !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() || raw_line.is_empty() {
            out.push(current);
        }
    }
    if out.is_empty() {
        out.push(String::new());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, QuickReplyOption, QuickReplySet};

    #[test]
    fn test_wrap_respects_width() {
        let lines = wrap("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn test_hidden_messages_are_not_projected() {
        let mut visible = Message::optimistic("shown");
        visible.direction = Direction::Inbound;
        let mut hidden = Message::optimistic("gone");
        hidden.hidden = true;

        let thread = ThreadState {
            id: "t".into(),
            messages: vec![visible, hidden],
            ..Default::default()
        };
        let lines = transcript_lines(&thread, 40);
        let text: String = lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.clone())
            .collect();
        assert!(text.contains("shown"));
        assert!(!text.contains("gone"));
    }

    #[test]
    fn test_selected_option_is_marked() {
        let mut msg = Message::optimistic("choose");
        msg.direction = Direction::Inbound;
        msg.answered = true;
        msg.selected_option = Some("a".into());
        msg.media.push(Media::QuickReplies(QuickReplySet {
            reference: None,
            options: vec![
                QuickReplyOption {
                    identifier: "a".into(),
                    title: "Track".into(),
                    ..Default::default()
                },
                QuickReplyOption {
                    identifier: "b".into(),
                    title: "Cancel".into(),
                    ..Default::default()
                },
            ],
        }));
        let thread = ThreadState {
            id: "t".into(),
            messages: vec![msg],
            ..Default::default()
        };
        let text: String = transcript_lines(&thread, 60)
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.clone())
            .collect();
        assert!(text.contains("Track*"));
        assert!(!text.contains("Cancel*"));
    }
}
