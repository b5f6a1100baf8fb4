//! Authentication for the chat backend
//!
//! Guest registration: the client posts its app id, secret key and stable
//! user/device identifiers and receives an opaque access token. There is no
//! interactive login; a 401 later simply means "register again".

pub mod tokens;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::Config;

pub use tokens::StoredToken;

/// SDK version advertised to the backend.
pub const SDK_VERSION: &str = "2.0.0";

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(rename = "accessToken")]
    access_token: Option<String>,
}

/// Register this install as a guest user and return the opaque access token.
pub async fn register_guest(
    http: &reqwest::Client,
    base_url: &str,
    app_id: &str,
    client_key: &str,
    user_id: &str,
    device_id: &str,
    language: &str,
) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let url = format!("{}/{}/register", base, app_id);

    let body = serde_json::json!({
        "tenant": "1",
        "userId": user_id,
        "channel": "rt",
        "channelType": "cli",
        "deviceId": device_id,
        "data": {
            "update": {
                "useragent": format!("rtchat-cli/{}", env!("CARGO_PKG_VERSION")),
                "os": std::env::consts::OS,
                "osversion": "1.0",
                "language": language,
            }
        }
    });

    tracing::info!("Registering guest user at {}", url);
    let resp = http
        .post(&url)
        .header("Content-Type", "application/json")
        .header("secretkey", client_key)
        .header("sdkversion", SDK_VERSION)
        .json(&body)
        .send()
        .await
        .context("Registration request failed")?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Registration failed: HTTP {} — {}", status.as_u16(), text);
    }

    let parsed: RegisterResponse = resp
        .json()
        .await
        .context("Failed to parse registration response")?;
    let token = parsed
        .access_token
        .filter(|t| !t.is_empty())
        .context("Registration response missing accessToken")?;

    tracing::info!("Guest registration succeeded");
    Ok(token)
}

/// Print the current authentication/identity status.
pub async fn status() -> Result<()> {
    let config = Config::load()?;

    println!("rtchat-cli status");
    println!("{:-<40}", "");
    match config.app_id.as_deref() {
        Some(app) => println!("  App:       {}", app),
        None => println!("  App:       (not configured)"),
    }
    match config.user_id.as_deref() {
        Some(user) => println!("  User:      {}", user),
        None => println!("  User:      (not generated yet)"),
    }
    match config.device_id.as_deref() {
        Some(device) => println!("  Device:    {}", device),
        None => println!("  Device:    (not generated yet)"),
    }
    match config.get_access_token() {
        Some(token) if !token.is_expired() => println!("  Token:     present"),
        Some(_) => println!("  Token:     expired"),
        None => println!("  Token:     none (obtained lazily on first use)"),
    }
    if let Ok(base) = config.api_base_url() {
        println!("  API:       {}", base);
    }
    if let Ok(host) = config.push_host_name() {
        println!("  Push:      {}", host);
    }
    Ok(())
}

/// Drop the session state (token, pending auto-start). The stable user and
/// device identifiers stay: they are this install's identity, and dropping
/// them would orphan the user's threads on the backend.
pub async fn logout() -> Result<()> {
    let mut config = Config::load()?;
    config.clear_session();
    config.save()?;
    println!("Session cleared.");
    Ok(())
}
