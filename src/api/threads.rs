//! Thread and message endpoints
//!
//! The vendor splits its surface oddly: thread listing and history live
//! under `/apps/{app}/user/{user}/...`, thread creation under
//! `/apps/{app}/threads`, and message send under the mobile-originated
//! `/{app}/mo` endpoint with the thread referenced in the body.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::client::ConnectClient;
use crate::models::event::RawInteractiveData;
use crate::models::{RawEvent, RawMedia, ThreadInfo};

#[derive(Debug, Deserialize)]
struct ThreadsResponse {
    threads: Option<Vec<ThreadInfo>>,
}

#[derive(Debug, Deserialize)]
struct CreateThreadResponse {
    thread: Option<ThreadInfo>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Option<Vec<RawEvent>>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    /// Asset URL, despite the field name.
    message: Option<String>,
    /// Media type key for the follow-up send (e.g. "file", "image").
    description: Option<String>,
}

/// An uploaded asset, ready to be sent as a media message.
#[derive(Debug, Clone)]
pub struct UploadedAsset {
    pub url: String,
    pub type_key: String,
}

impl UploadedAsset {
    /// Media descriptor for the send payload: the URL sits under a dynamic
    /// key named by the content type.
    pub fn to_media(&self) -> RawMedia {
        let mut extra = serde_json::Map::new();
        extra.insert(
            self.type_key.clone(),
            serde_json::Value::String(self.url.clone()),
        );
        RawMedia {
            content_type: Some(self.type_key.clone()),
            extra,
            ..Default::default()
        }
    }
}

/// Options for [`send_message`].
#[derive(Debug, Default)]
pub struct SendOptions {
    /// tid of the question this message answers (quick-reply click).
    pub related_tid: Option<String>,
    /// Selected-option descriptor echoed back to the bot.
    pub interactive_data: Option<RawInteractiveData>,
    /// Preferred reply language.
    pub language: Option<String>,
}

/// List this user's threads, newest first as the backend returns them.
pub async fn list_threads(client: &mut ConnectClient) -> Result<Vec<ThreadInfo>> {
    let url = format!(
        "{}/apps/{}/user/{}/threads?start=0&limit=100",
        client.base_url(),
        client.app_id(),
        client.user_id()
    );
    let resp = client.get(&url).await?;
    let body: ThreadsResponse = resp.json().await.context("Failed to parse threads response")?;
    let threads = body
        .threads
        .unwrap_or_default()
        .into_iter()
        .filter(|t| t.id.as_deref().map(|id| !id.is_empty()).unwrap_or(false))
        .collect();
    Ok(threads)
}

/// Create a new conversation thread.
pub async fn create_thread(client: &mut ConnectClient) -> Result<ThreadInfo> {
    let url = format!("{}/apps/{}/threads", client.base_url(), client.app_id());
    let body = serde_json::json!({
        "title": format!("{}_cli", chrono::Utc::now().timestamp_millis()),
        "type": "Conversation",
        "status": "Active",
    });
    let resp = client.post_json(&url, &body).await?;
    let parsed: CreateThreadResponse = resp
        .json()
        .await
        .context("Failed to parse create-thread response")?;
    parsed
        .thread
        .filter(|t| t.id.as_deref().map(|id| !id.is_empty()).unwrap_or(false))
        .context("Create-thread response carried no thread")
}

/// Fetch one thread's message history. Order is not guaranteed by the
/// contract; the reconciler sorts.
pub async fn fetch_history(client: &mut ConnectClient, thread_id: &str) -> Result<Vec<RawEvent>> {
    let url = format!(
        "{}/apps/{}/user/{}/threads/{}/messages?limit=100",
        client.base_url(),
        client.app_id(),
        client.user_id(),
        thread_id
    );
    tracing::debug!("Fetching history for {}", thread_id);
    let resp = client.get(&url).await?;
    let body: MessagesResponse = resp
        .json()
        .await
        .context("Failed to parse messages response")?;
    Ok(body.messages.unwrap_or_default())
}

/// Send a message (text, media, or a quick-reply answer) into a thread.
pub async fn send_message(
    client: &mut ConnectClient,
    thread_id: &str,
    text: Option<&str>,
    media: Option<&[RawMedia]>,
    options: &SendOptions,
) -> Result<RawEvent> {
    let url = format!("{}/{}/mo", client.base_url(), client.app_id());

    let mut body = serde_json::json!({
        "clientId": client.client_id(),
        "channel": "rt",
        "thread": {
            "id": thread_id,
            "title": "Conversation",
            "type": "Conversation",
        },
        "extras": {
            "browserfingerprint": client.user_id(),
            "useragent": format!("rtchat-cli/{}", env!("CARGO_PKG_VERSION")),
        },
        "outgoing": true,
    });
    let obj = body.as_object_mut().expect("body is an object");
    if let Some(text) = text {
        obj.insert("message".into(), serde_json::Value::String(text.into()));
    }
    if let Some(media) = media {
        obj.insert("media".into(), serde_json::to_value(media)?);
    }
    if let Some(ref related) = options.related_tid {
        obj.insert(
            "relatedTid".into(),
            serde_json::Value::String(related.clone()),
        );
    }
    if let Some(ref interactive) = options.interactive_data {
        obj.insert("interactiveData".into(), serde_json::to_value(interactive)?);
    }
    if let Some(ref language) = options.language {
        obj.insert(
            "language".into(),
            serde_json::Value::String(language.clone()),
        );
    }

    tracing::debug!("Sending message to thread {}", thread_id);
    let resp = client.post_json(&url, &body).await?;
    resp.json().await.context("Failed to parse send response")
}

/// Upload a file as an asset; the returned descriptor feeds a media send.
pub async fn upload_file(client: &mut ConnectClient, path: &Path) -> Result<UploadedAsset> {
    let url = format!("{}/apps/{}/assets", client.base_url(), client.app_id());
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read file {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();

    tracing::info!("Uploading {} ({} bytes)", file_name, bytes.len());
    let resp = client
        .post_multipart(&url, || {
            let part =
                reqwest::multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
            Ok(reqwest::multipart::Form::new()
                .part("file", part)
                .text("type", "attachment"))
        })
        .await?;

    let parsed: UploadResponse = resp.json().await.context("Failed to parse upload response")?;
    let url = parsed
        .message
        .filter(|u| !u.is_empty())
        .context("Upload response carried no asset URL")?;
    Ok(UploadedAsset {
        url,
        type_key: parsed.description.unwrap_or_else(|| "file".to_string()),
    })
}
