//! Token storage and management

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stored access token. Guest-registration tokens are opaque and usually
/// carry no expiry; staleness then only surfaces as a 401 and is handled by
/// re-registering lazily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

impl StoredToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| now_secs() + secs);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => now_secs() + 300 >= exp,
            None => false,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_token_never_expires_locally() {
        let token = StoredToken::new("tok".into(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_expiry_includes_slack() {
        let fresh = StoredToken::new("tok".into(), Some(3600));
        assert!(!fresh.is_expired());
        let nearly = StoredToken::new("tok".into(), Some(60));
        assert!(nearly.is_expired(), "under the 5 minute slack");
    }
}
