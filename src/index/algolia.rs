use async_trait::async_trait;
use std::time::Duration;

use super::SearchIndex;
use crate::config::AlgoliaConfig;
use crate::error::{NoteSearchError, Result};
use crate::types::{IndexRecord, SaveObjectResponse, SearchQuery, SearchResponse};

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// REST client for an Algolia application, bound to one API key.
///
/// Writes go to `https://{app_id}.algolia.net`, reads to the DSN host
/// `https://{app_id}-dsn.algolia.net`, unless a base URL override is set.
#[derive(Clone)]
pub struct AlgoliaClient {
    app_id: String,
    api_key: String,
    write_host: String,
    read_host: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for AlgoliaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgoliaClient")
            .field("app_id", &self.app_id)
            .field("write_host", &self.write_host)
            .field("read_host", &self.read_host)
            .finish_non_exhaustive()
    }
}

impl AlgoliaClient {
    pub fn new(app_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        let app_id = app_id.into();
        let write_host = format!("https://{}.algolia.net", app_id.to_lowercase());
        let read_host = format!("https://{}-dsn.algolia.net", app_id.to_lowercase());
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            app_id,
            api_key: api_key.into(),
            write_host,
            read_host,
            http_client,
        }
    }

    /// Sends both reads and writes to `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.write_host = base.clone();
        self.read_host = base;
        self
    }

    /// Admin client for index writes.
    pub fn admin(config: &AlgoliaConfig) -> Result<Self> {
        let client = Self::new(config.require_app_id()?, config.require_api_key()?);
        Ok(match config.host {
            Some(ref host) if !host.trim().is_empty() => client.with_base_url(host.as_str()),
            _ => client,
        })
    }

    /// Client for searching with `api_key` (typically a scoped key).
    pub fn searcher(config: &AlgoliaConfig, api_key: &str) -> Result<Self> {
        let client = Self::new(config.require_app_id()?, api_key);
        Ok(match config.host {
            Some(ref host) if !host.trim().is_empty() => client.with_base_url(host.as_str()),
            _ => client,
        })
    }

    /// Same hosts and connection pool, different key.
    pub fn with_api_key(&self, api_key: impl Into<String>) -> Self {
        AlgoliaClient {
            api_key: api_key.into(),
            ..self.clone()
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn object_url(&self, index_name: &str, object_id: &str) -> String {
        format!(
            "{}/1/indexes/{}/{}",
            self.write_host,
            urlencoding::encode(index_name),
            urlencoding::encode(object_id)
        )
    }

    fn query_url(&self, index_name: &str) -> String {
        format!(
            "{}/1/indexes/{}/query",
            self.read_host,
            urlencoding::encode(index_name)
        )
    }

    fn with_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("X-Algolia-Application-Id", &self.app_id)
            .header("X-Algolia-API-Key", &self.api_key)
    }
}

/// Provider message from an error body, falling back to the raw text.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("{} {}", status, text))
}

#[async_trait]
impl SearchIndex for AlgoliaClient {
    async fn save_object(
        &self,
        index_name: &str,
        record: IndexRecord,
    ) -> Result<SaveObjectResponse> {
        let object_id = record.object_id.clone();
        let url = self.object_url(index_name, &object_id);

        let response = self
            .with_auth(self.http_client.put(&url))
            .json(&record.to_json())
            .send()
            .await
            .map_err(|e| NoteSearchError::SyncUpsert {
                object_id: object_id.clone(),
                status: None,
                message: format!("request to {} failed: {}", self.write_host, e),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            let message = error_message(response).await;
            return Err(NoteSearchError::Config(format!(
                "index rejected admin credentials ({}): {}",
                status, message
            )));
        }
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(NoteSearchError::SyncUpsert {
                object_id,
                status: Some(status.as_u16()),
                message,
            });
        }

        response
            .json::<SaveObjectResponse>()
            .await
            .map_err(|e| NoteSearchError::SyncUpsert {
                object_id,
                status: Some(status.as_u16()),
                message: format!("unreadable save response: {}", e),
            })
    }

    async fn search(&self, index_name: &str, query: &SearchQuery) -> Result<SearchResponse> {
        let url = self.query_url(index_name);
        let body = serde_json::json!({ "params": query.to_params() });

        let response = self
            .with_auth(self.http_client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| NoteSearchError::SearchQuery {
                status: None,
                message: format!("request to {} failed: {}", self.read_host, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(NoteSearchError::SearchQuery {
                status: Some(status.as_u16()),
                message,
            });
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| NoteSearchError::SearchQuery {
                status: Some(status.as_u16()),
                message: format!("unreadable search response: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> IndexRecord {
        IndexRecord::from_fields(
            "n1",
            json!({"author": "u1", "text": "hello"})
                .as_object()
                .unwrap()
                .clone(),
        )
    }

    #[test]
    fn hosted_endpoints_derive_from_app_id() {
        let client = AlgoliaClient::new("ABC123", "key");
        assert_eq!(
            client.object_url("notes", "n 1"),
            "https://abc123.algolia.net/1/indexes/notes/n%201"
        );
        assert_eq!(
            client.query_url("notes"),
            "https://abc123-dsn.algolia.net/1/indexes/notes/query"
        );
    }

    #[test]
    fn debug_hides_api_key() {
        let client = AlgoliaClient::new("APP", "super-secret");
        assert!(!format!("{:?}", client).contains("super-secret"));
    }

    #[tokio::test]
    async fn save_object_puts_record_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/1/indexes/notes/n1"))
            .and(header("X-Algolia-Application-Id", "APP"))
            .and(header("X-Algolia-API-Key", "admin"))
            .and(body_json(json!({"objectID": "n1", "author": "u1", "text": "hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "objectID": "n1",
                "taskID": 7,
                "updatedAt": "2024-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "admin").with_base_url(server.uri());
        let resp = client.save_object("notes", record()).await.unwrap();
        assert_eq!(resp.object_id, "n1");
        assert_eq!(resp.task_id, Some(7));
    }

    #[tokio::test]
    async fn save_object_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({"message": "overloaded"})))
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "admin").with_base_url(server.uri());
        let err = client.save_object("notes", record()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            NoteSearchError::SyncUpsert { status: Some(503), ref message, .. } if message == "overloaded"
        ));
    }

    #[tokio::test]
    async fn save_object_rejected_admin_key_is_config_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                json!({"message": "Invalid Application-ID or API key", "status": 403}),
            ))
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "wrong").with_base_url(server.uri());
        let err = client.save_object("notes", record()).await.unwrap_err();
        assert!(matches!(err, NoteSearchError::Config(_)));
    }

    #[tokio::test]
    async fn save_object_unreachable_host_is_transient() {
        let client = AlgoliaClient::new("APP", "admin").with_base_url("http://127.0.0.1:9");
        let err = client.save_object("notes", record()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn search_posts_params_and_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/notes/query"))
            .and(header("X-Algolia-API-Key", "scoped"))
            .and(body_json(json!({"params": "query=hello&hitsPerPage=5"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "n1", "author": "u1", "text": "hello"}],
                "nbHits": 1,
                "page": 0,
                "hitsPerPage": 5,
                "query": "hello"
            })))
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "scoped").with_base_url(server.uri());
        let resp = client
            .search("notes", &SearchQuery::new("hello").with_hits_per_page(5))
            .await
            .unwrap();
        assert_eq!(resp.nb_hits, 1);
        assert_eq!(resp.hits[0].object_id, "n1");
    }

    #[tokio::test]
    async fn search_rejection_is_search_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(
                json!({"message": "Invalid Application-ID or API key", "status": 403}),
            ))
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "stale").with_base_url(server.uri());
        let err = client
            .search("notes", &SearchQuery::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, NoteSearchError::SearchQuery { status: Some(403), .. }));
    }

    #[test]
    fn admin_requires_credentials() {
        let err = AlgoliaClient::admin(&AlgoliaConfig::default()).unwrap_err();
        assert!(matches!(err, NoteSearchError::Config(_)));
    }
}
