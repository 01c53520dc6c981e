use crate::config::BrokerConfig;
use crate::{Result, TradeError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Token lifetime assumed when the server omits `expires_in`
const DEFAULT_EXPIRES_IN_SECS: i64 = 24 * 60 * 60;

/// Tokens issued by the authorization server
#[derive(Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

// Tokens are secrets; keep them out of logs
impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// OAuth2 authorization server as seen by the session manager
#[async_trait]
pub trait AuthorizationServer: Send + Sync {
    /// URL the user opens to approve access and obtain a one-time code
    fn authorization_url(&self) -> String;

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

#[derive(Debug, Deserialize)]
struct OAuthError {
    error: Option<String>,
    error_description: Option<String>,
}

/// Upstox-style OAuth2 client
#[derive(Clone)]
pub struct UpstoxAuthClient {
    client: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl UpstoxAuthClient {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    async fn request_token(&self, grant: &[(&str, &str)]) -> Result<TokenGrant> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .client
            .post(format!("{}/login/authorization/token", self.base_url))
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(classify_token_error(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// `invalid_grant` means the code or refresh token is dead for good;
/// everything else is reported as a plain rejection.
fn classify_token_error(status: u16, body: &str) -> TradeError {
    let parsed: Option<OAuthError> = serde_json::from_str(body).ok();
    let code = parsed.as_ref().and_then(|e| e.error.as_deref());

    if matches!(status, 400 | 401) && code == Some("invalid_grant") {
        let description = parsed
            .as_ref()
            .and_then(|e| e.error_description.clone())
            .unwrap_or_else(|| "invalid_grant".to_string());
        return TradeError::InvalidGrant(description);
    }

    TradeError::remote(Some(status), format!("token endpoint: {}", body))
}

#[async_trait]
impl AuthorizationServer for UpstoxAuthClient {
    fn authorization_url(&self) -> String {
        let base = format!("{}/login/authorization/dialog", self.base_url);
        let params = [
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        match Url::parse_with_params(&base, &params) {
            Ok(url) => url.to_string(),
            Err(_) => format!(
                "{}?response_type=code&client_id={}&redirect_uri={}",
                base,
                urlencoding::encode(&self.client_id),
                urlencoding::encode(&self.redirect_uri)
            ),
        }
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        tracing::debug!("Exchanging authorization code");
        self.request_token(&[("grant_type", "authorization_code"), ("code", code)])
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
        tracing::debug!("Requesting token refresh");
        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}
