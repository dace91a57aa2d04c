//! Sources of identity-provider ID tokens for the key endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use notesearch::error::{NoteSearchError, Result};

/// Identity Toolkit REST base for password sign-in.
pub const IDENTITY_TOOLKIT_URL: &str = "https://identitytoolkit.googleapis.com";

/// Tokens are refreshed this long before the provider says they expire.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[async_trait]
pub trait IdTokenSource: Send + Sync {
    /// A currently valid ID token, signing in first if there is no session.
    async fn id_token(&self) -> Result<String>;
}

/// A fixed, externally obtained token.
pub struct StaticIdToken(String);

impl StaticIdToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticIdToken(token.into())
    }
}

#[async_trait]
impl IdTokenSource for StaticIdToken {
    async fn id_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    #[serde(default)]
    expires_in: Option<String>,
    #[serde(default)]
    local_id: Option<String>,
}

struct Session {
    id_token: String,
    expires_at: Instant,
}

/// Email/password sign-in for a configured user. The session's token is
/// reused until shortly before it expires.
pub struct PasswordSignIn {
    http_client: reqwest::Client,
    base_url: String,
    web_api_key: String,
    email: String,
    password: String,
    session: Mutex<Option<Session>>,
}

impl PasswordSignIn {
    pub fn new(
        web_api_key: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        PasswordSignIn {
            http_client,
            base_url: IDENTITY_TOOLKIT_URL.to_string(),
            web_api_key: web_api_key.into(),
            email: email.into(),
            password: password.into(),
            session: Mutex::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn sign_in(&self) -> Result<Session> {
        let url = format!("{}/v1/accounts:signInWithPassword", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.web_api_key.as_str())])
            .json(&SignInRequest {
                email: &self.email,
                password: &self.password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| NoteSearchError::KeyIssuance(format!("sign-in request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let reason = body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            tracing::warn!(status = %status, reason = %reason, "Sign-in rejected");
            return Err(NoteSearchError::invalid_credential(format!(
                "sign-in rejected: {}",
                reason
            )));
        }

        let body: SignInResponse = response
            .json()
            .await
            .map_err(|e| NoteSearchError::KeyIssuance(format!("unreadable sign-in response: {}", e)))?;
        let lifetime = body
            .expires_in
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(3600));

        tracing::info!(uid = ?body.local_id, "Signed in");
        Ok(Session {
            id_token: body.id_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_SKEW),
        })
    }
}

#[async_trait]
impl IdTokenSource for PasswordSignIn {
    async fn id_token(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(ref s) = *session {
            if Instant::now() < s.expires_at {
                return Ok(s.id_token.clone());
            }
        }
        let fresh = self.sign_in().await?;
        let token = fresh.id_token.clone();
        *session = Some(fresh);
        Ok(token)
    }
}
