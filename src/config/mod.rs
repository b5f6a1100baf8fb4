//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::StoredToken;
use crate::engine::{AutoStartConfig, AutoStartPolicy};

/// Application configuration
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat application id (from `rtchat-cli register`)
    pub app_id: Option<String>,
    /// Client secret sent as the `secretkey` header
    pub client_key: Option<String>,
    /// Site URL the API/push hosts are derived from
    pub site_url: Option<String>,
    /// Explicit API base URL override
    pub base_url: Option<String>,
    /// Explicit push (MQTT over WSS) host override
    pub push_host: Option<String>,
    /// Preferred language, e.g. "cs" (defaults from $LANG)
    pub locale: Option<String>,
    /// Start message sent automatically on first load
    pub start_message: Option<String>,
    /// Send the start message invisibly
    #[serde(default)]
    pub start_message_hidden: bool,
    /// Auto-start trigger policy: "only-when-empty" (default) or "always"
    pub auto_start_policy: Option<String>,
    /// Stable per-install user identifier (UUID, generated on first run)
    pub user_id: Option<String>,
    /// Stable per-install device identifier
    pub device_id: Option<String>,
    /// Opaque access token from guest registration
    pub access_token: Option<StoredToken>,
    /// Hidden auto-start send in flight; survives a restart mid-flow so the
    /// suppression is neither re-triggered nor leaked
    pub pending_start_text: Option<String>,
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "rtchat", "rtchat-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains tokens)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// App id and client key, or a clear error telling the user to register.
    pub fn app_credentials(&self) -> Result<(String, String)> {
        let app_id = self
            .app_id
            .clone()
            .context("No app id configured. Run 'rtchat-cli register' first.")?;
        let client_key = self
            .client_key
            .clone()
            .context("No client key configured. Run 'rtchat-cli register' first.")?;
        Ok((app_id, client_key))
    }

    /// Stable user/device identifiers, generating and persisting them on
    /// first use.
    pub fn ensure_identity(&mut self) -> Result<(String, String)> {
        let mut dirty = false;
        let user_id = match self.user_id.clone() {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                self.user_id = Some(id.clone());
                dirty = true;
                id
            }
        };
        let device_id = match self.device_id.clone() {
            Some(id) => id,
            None => {
                let id = format!("v2_cli_{}", uuid::Uuid::new_v4().simple());
                self.device_id = Some(id.clone());
                dirty = true;
                id
            }
        };
        if dirty {
            self.save()?;
        }
        Ok((user_id, device_id))
    }

    /// API base URL: explicit override, else derived from the site URL.
    pub fn api_base_url(&self) -> Result<String> {
        if let Some(ref base) = self.base_url {
            return Ok(base.trim_end_matches('/').to_string());
        }
        let site = self
            .site_url
            .as_deref()
            .context("No base-url or site-url configured. Run 'rtchat-cli register'.")?;
        Ok(derive_hosts(site)?.0)
    }

    /// Push host: explicit override, else derived from the site URL.
    pub fn push_host_name(&self) -> Result<String> {
        if let Some(ref host) = self.push_host {
            return Ok(host.clone());
        }
        let site = self
            .site_url
            .as_deref()
            .context("No push-host or site-url configured. Run 'rtchat-cli register'.")?;
        Ok(derive_hosts(site)?.1)
    }

    /// Preferred language, falling back to $LANG, normalized to the bare
    /// language code ("cs-CZ" / "cs_CZ.UTF-8" -> "cs").
    pub fn language(&self) -> String {
        let raw = self
            .locale
            .clone()
            .or_else(|| std::env::var("LANG").ok())
            .unwrap_or_else(|| "en".to_string());
        normalize_language(&raw)
    }

    /// Auto-start configuration, when a start message is set.
    pub fn auto_start(&self) -> Option<AutoStartConfig> {
        let text = self.start_message.clone()?;
        if text.trim().is_empty() {
            return None;
        }
        let policy = self
            .auto_start_policy
            .as_deref()
            .and_then(AutoStartPolicy::parse)
            .unwrap_or_default();
        Some(AutoStartConfig {
            text,
            hidden: self.start_message_hidden,
            policy,
        })
    }

    pub fn get_access_token(&self) -> Option<StoredToken> {
        self.access_token.clone()
    }

    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(StoredToken::new(token, None));
    }

    pub fn clear_session(&mut self) {
        self.access_token = None;
        self.pending_start_text = None;
    }
}

/// Derive the API base URL and push host from the vendor site URL.
///
/// `https://{tenant}.{region}.webexconnect.io` maps to the API host
/// `{tenant}-usor.{region}.webexconnect.io` (the `-usor` infix is only
/// injected when not already present) and the push host
/// `{tenant}.msg-usor.{region}.webexconnect.io`.
pub fn derive_hosts(site_url: &str) -> Result<(String, String)> {
    let url = url::Url::parse(site_url).with_context(|| format!("Invalid site URL: {site_url}"))?;
    let host = url.host_str().context("Site URL has no host")?;
    let mut parts = host.splitn(2, '.');
    let tenant = parts.next().context("Site URL host has no tenant part")?;
    let rest = parts
        .next()
        .with_context(|| format!("Site URL host has no domain part: {host}"))?;

    let api_host = if tenant.ends_with("-usor") {
        host.to_string()
    } else {
        format!("{tenant}-usor.{rest}")
    };
    let base_tenant = tenant.trim_end_matches("-usor");
    let push_host = format!("{base_tenant}.msg-usor.{rest}");

    Ok((format!("https://{api_host}/rtmsAPI/api/v3"), push_host))
}

/// Strip region/encoding suffixes from a locale string.
fn normalize_language(raw: &str) -> String {
    let lang = raw
        .split(['-', '_', '.'])
        .next()
        .unwrap_or(raw)
        .to_lowercase();
    if lang.is_empty() {
        "en".to_string()
    } else {
        lang
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_hosts_injects_usor_infix() {
        let (base, push) = derive_hosts("https://acme.us.webexconnect.io").unwrap();
        assert_eq!(base, "https://acme-usor.us.webexconnect.io/rtmsAPI/api/v3");
        assert_eq!(push, "acme.msg-usor.us.webexconnect.io");
    }

    #[test]
    fn test_derive_hosts_keeps_existing_infix() {
        let (base, push) = derive_hosts("https://acme-usor.us.webexconnect.io").unwrap();
        assert_eq!(base, "https://acme-usor.us.webexconnect.io/rtmsAPI/api/v3");
        assert_eq!(push, "acme.msg-usor.us.webexconnect.io");
    }

    #[test]
    fn test_derive_hosts_rejects_garbage() {
        assert!(derive_hosts("not a url").is_err());
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("cs-CZ"), "cs");
        assert_eq!(normalize_language("cs_CZ.UTF-8"), "cs");
        assert_eq!(normalize_language("en"), "en");
    }

    #[test]
    fn test_auto_start_requires_non_blank_text() {
        let config = Config {
            start_message: Some("  ".into()),
            ..Default::default()
        };
        assert!(config.auto_start().is_none());

        let config = Config {
            start_message: Some("Hi there".into()),
            start_message_hidden: true,
            auto_start_policy: Some("always".into()),
            ..Default::default()
        };
        let auto = config.auto_start().unwrap();
        assert!(auto.hidden);
        assert_eq!(auto.policy, AutoStartPolicy::Always);
    }
}
