use async_trait::async_trait;
use std::time::Duration;

use notesearch::error::{NoteSearchError, Result};
use notesearch::types::{ScopedSearchKey, SearchKeyResponse};

/// Exchanges an ID token for a scoped search key.
#[async_trait]
pub trait KeyIssuer: Send + Sync {
    async fn fetch_key(&self, id_token: &str) -> Result<ScopedSearchKey>;
}

/// Calls `GET /getSearchKey` on the notesearch server.
pub struct HttpKeyIssuer {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpKeyIssuer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        HttpKeyIssuer {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl KeyIssuer for HttpKeyIssuer {
    async fn fetch_key(&self, id_token: &str) -> Result<ScopedSearchKey> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .bearer_auth(id_token)
            .send()
            .await
            .map_err(|e| NoteSearchError::KeyIssuance(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(NoteSearchError::invalid_credential(
                "key endpoint rejected the ID token",
            ));
        }
        if !status.is_success() {
            return Err(NoteSearchError::KeyIssuance(format!(
                "key endpoint returned {}",
                status
            )));
        }

        let body: SearchKeyResponse = response
            .json()
            .await
            .map_err(|e| NoteSearchError::KeyIssuance(format!("unreadable key response: {}", e)))?;
        tracing::debug!("Fetched scoped search key");
        Ok(body.key)
    }
}
