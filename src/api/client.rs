//! Authenticated HTTP client for the chat backend
//!
//! Wraps reqwest::Client with the vendor auth headers (`accesstoken` +
//! `secretkey` + `sdkversion`) and lazy token refresh: a 401 triggers one
//! guest re-registration and a single retry before surfacing the error.

use anyhow::{bail, Context, Result};

use crate::auth::{self, StoredToken};
use crate::config::Config;

/// Authenticated client bound to one app/user identity.
pub struct ConnectClient {
    http: reqwest::Client,
    config: Config,
    base_url: String,
    app_id: String,
    client_key: String,
    user_id: String,
    device_id: String,
}

impl ConnectClient {
    /// Build a client from config, registering as a guest if no usable
    /// token is stored yet.
    pub async fn new(mut config: Config) -> Result<Self> {
        let (app_id, client_key) = config.app_credentials()?;
        let base_url = config.api_base_url()?;
        let (user_id, device_id) = config.ensure_identity()?;
        let http = reqwest::Client::new();

        let needs_token = config
            .get_access_token()
            .map_or(true, |token| token.is_expired());
        if needs_token {
            tracing::info!("No usable access token, registering...");
            let language = config.language();
            let token = auth::register_guest(
                &http,
                &base_url,
                &app_id,
                &client_key,
                &user_id,
                &device_id,
                &language,
            )
            .await?;
            config.set_access_token(token);
            config.save()?;
        }

        Ok(Self {
            http,
            config,
            base_url,
            app_id,
            client_key,
            user_id,
            device_id,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// Base client id, `{appId}/{userId}/{deviceId}`. The push channel
    /// appends an `/at_{token}` suffix; REST payloads use the base form.
    pub fn client_id(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.user_id, self.device_id)
    }

    pub fn access_token(&self) -> Result<StoredToken> {
        self.config
            .get_access_token()
            .context("No access token present")
    }

    /// GET with auth headers and lazy 401 refresh.
    pub async fn get(&mut self, url: &str) -> Result<reqwest::Response> {
        self.request_with_retry(Method::Get, url, None).await
    }

    /// POST a JSON body with auth headers and lazy 401 refresh.
    pub async fn post_json(
        &mut self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        self.request_with_retry(Method::PostJson, url, Some(body))
            .await
    }

    /// POST a multipart form (file upload). Multipart bodies are not
    /// replayable, so the caller sees the 401 if the retry path also fails.
    pub async fn post_multipart(
        &mut self,
        url: &str,
        build_form: impl Fn() -> Result<reqwest::multipart::Form>,
    ) -> Result<reqwest::Response> {
        let token = self.access_token()?.token;
        let resp = self
            .http
            .post(url)
            .header("accesstoken", &token)
            .header("secretkey", &self.client_key)
            .header("sdkversion", auth::SDK_VERSION)
            .multipart(build_form()?)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.refresh_token().await?;
            let token = self.access_token()?.token;
            let resp = self
                .http
                .post(url)
                .header("accesstoken", &token)
                .header("secretkey", &self.client_key)
                .header("sdkversion", auth::SDK_VERSION)
                .multipart(build_form()?)
                .send()
                .await
                .with_context(|| format!("POST {} failed after token refresh", url))?;
            return check_response(resp, url).await;
        }
        check_response(resp, url).await
    }

    async fn request_with_retry(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let resp = self.send_once(method, url, body).await?;
        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return check_response(resp, url).await;
        }

        tracing::info!("401 from {}, re-registering and retrying once", url);
        self.refresh_token().await?;
        let resp = self.send_once(method, url, body).await?;
        check_response(resp, url).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let token = self.access_token()?.token;
        tracing::debug!("{:?} {}", method, url);
        let builder = match method {
            Method::Get => self.http.get(url),
            Method::PostJson => {
                let body = body.expect("PostJson requires a body");
                self.http
                    .post(url)
                    .header("Content-Type", "application/json")
                    .json(body)
            }
        };
        builder
            .header("accesstoken", &token)
            .header("secretkey", &self.client_key)
            .header("sdkversion", auth::SDK_VERSION)
            .send()
            .await
            .with_context(|| format!("{:?} {} failed", method, url))
    }

    async fn refresh_token(&mut self) -> Result<()> {
        let language = self.config.language();
        let token = auth::register_guest(
            &self.http,
            &self.base_url,
            &self.app_id,
            &self.client_key,
            &self.user_id,
            &self.device_id,
            &language,
        )
        .await
        .context("Token refresh (guest re-registration) failed")?;
        self.config.set_access_token(token);
        self.config.save()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    PostJson,
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {} even after re-registration. Check app-id/client-key.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
