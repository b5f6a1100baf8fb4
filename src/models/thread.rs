//! Thread-related models

use serde::{Deserialize, Serialize};

/// Thread summary as returned by the threads listing endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub status: Option<String>,
    pub created_on: Option<String>,
    pub created: Option<serde_json::Value>,
    pub last_message: Option<String>,
    pub unread_count: Option<u32>,
}
