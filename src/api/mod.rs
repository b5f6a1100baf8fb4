//! API client module for the chat backend

pub mod client;
pub mod threads;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::engine::normalize::{normalize, Normalized};
use crate::engine::reconcile;
use crate::models::{Media, Message};
use client::ConnectClient;

/// List this user's conversation threads (prints to stdout).
pub async fn list_threads() -> Result<()> {
    let mut client = ConnectClient::new(Config::load()?).await?;
    let threads = threads::list_threads(&mut client).await?;

    println!("\nConversations:");
    println!("{:-<60}", "");

    if threads.is_empty() {
        println!("  (no conversations yet)");
        return Ok(());
    }

    for thread in &threads {
        println!("{}", thread.title.as_deref().unwrap_or("Conversation"));
        if let Some(ref id) = thread.id {
            println!("  ID: {}", id);
        }
        if let Some(ref created) = thread.created_on {
            println!("  Created: {}", created);
        }
        if let Some(preview) = thread.last_message.as_deref().filter(|p| !p.trim().is_empty()) {
            println!("  Last: {}", preview.trim());
        }
        if let Some(unread) = thread.unread_count.filter(|&n| n > 0) {
            println!("  Unread: {}", unread);
        }
        println!();
    }
    Ok(())
}

/// Create a new conversation thread (prints the id).
pub async fn new_thread() -> Result<()> {
    let mut client = ConnectClient::new(Config::load()?).await?;
    let thread = threads::create_thread(&mut client).await?;
    println!(
        "Created thread {}",
        thread.id.as_deref().unwrap_or("(no id)")
    );
    Ok(())
}

/// Print one thread's reconciled transcript; optionally save it to a file.
pub async fn read_messages(thread_id: &str, output: Option<&Path>) -> Result<()> {
    let config = Config::load()?;
    let hidden_start = config
        .auto_start()
        .filter(|a| a.hidden)
        .map(|a| a.text);
    let mut client = ConnectClient::new(config).await?;

    let raws = threads::fetch_history(&mut client, thread_id).await?;
    let mut messages: Vec<Message> = raws
        .iter()
        .filter_map(|raw| match normalize(raw) {
            Some(Normalized::Message(msg)) => Some(msg),
            _ => None,
        })
        .collect();
    reconcile::reconcile(&mut messages, hidden_start.as_deref());

    let transcript = render_transcript(&messages);
    if transcript.is_empty() {
        println!("(no messages)");
        return Ok(());
    }

    match output {
        Some(path) => {
            std::fs::write(path, transcript.join("\n") + "\n")
                .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
            println!("Transcript saved to {}", path.display());
        }
        None => {
            for line in &transcript {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

/// Send a text message to a thread.
pub async fn send_text(thread_id: &str, message: &str) -> Result<()> {
    let config = Config::load()?;
    let language = config.language();
    let mut client = ConnectClient::new(config).await?;
    threads::send_message(
        &mut client,
        thread_id,
        Some(message),
        None,
        &threads::SendOptions {
            language: Some(language),
            ..Default::default()
        },
    )
    .await?;
    println!("Message sent.");
    Ok(())
}

/// Upload a file and send it as an attachment message.
pub async fn send_file(thread_id: &str, path: &Path) -> Result<()> {
    let config = Config::load()?;
    let language = config.language();
    let mut client = ConnectClient::new(config).await?;
    let asset = threads::upload_file(&mut client, path).await?;
    threads::send_message(
        &mut client,
        thread_id,
        None,
        Some(&[asset.to_media()]),
        &threads::SendOptions {
            language: Some(language),
            ..Default::default()
        },
    )
    .await?;
    println!("Attachment sent.");
    Ok(())
}

/// Format a reconciled message list for terminal or file output. Hidden
/// entries (merged answers, abandoned prompts, hidden start) are omitted —
/// the transcript is lossless apart from those by design.
fn render_transcript(messages: &[Message]) -> Vec<String> {
    let mut lines = Vec::new();
    for msg in messages.iter().filter(|m| !m.hidden) {
        let who = if msg.is_outbound() { "you" } else { "agent" };
        let stamp = msg.created_at.format("%Y-%m-%d %H:%M");

        if let Some(text) = msg.text.as_deref().filter(|t| !t.trim().is_empty()) {
            if msg.form().is_none() {
                lines.push(format!("[{}] {}: {}", stamp, who, text.trim()));
            }
        }

        for media in &msg.media {
            match media {
                Media::Form(form) => {
                    let title = form.title.as_deref().unwrap_or("Form");
                    lines.push(format!("[{}] {}: [form] {}", stamp, who, title));
                    for field in &form.fields {
                        let label = field.label.as_deref().unwrap_or(&field.name);
                        let value = field.value.as_deref().unwrap_or("-");
                        lines.push(format!("    {}: {}", label, value));
                    }
                }
                Media::QuickReplies(qr) => {
                    let options: Vec<String> = qr
                        .options
                        .iter()
                        .map(|opt| {
                            if msg.selected_option.as_deref() == Some(opt.identifier.as_str()) {
                                format!("[{}]*", opt.title)
                            } else {
                                format!("[{}]", opt.title)
                            }
                        })
                        .collect();
                    lines.push(format!("[{}] {}: {}", stamp, who, options.join(" ")));
                }
                Media::Attachment(att) => {
                    let name = att
                        .file_name
                        .as_deref()
                        .or(att.url.as_deref())
                        .unwrap_or("attachment");
                    lines.push(format!("[{}] {}: [{}] {}", stamp, who, att.content_type, name));
                }
            }
        }
    }
    lines
}
