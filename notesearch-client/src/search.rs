use async_trait::async_trait;
use std::sync::Arc;

use notesearch::error::Result;
use notesearch::index::{AlgoliaClient, SearchIndex};
use notesearch::types::{SearchQuery, SearchResponse, DEFAULT_HITS_PER_PAGE, NOTES_INDEX};

use crate::cache::ClientKeyCache;

/// Runs a query against the index with a caller-chosen search key.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, api_key: &str, query: &SearchQuery) -> Result<SearchResponse>;
}

/// Queries the `notes` index over the Algolia REST API.
pub struct AlgoliaSearchBackend {
    client: AlgoliaClient,
    index_name: String,
}

impl AlgoliaSearchBackend {
    pub fn new(client: AlgoliaClient) -> Self {
        AlgoliaSearchBackend {
            client,
            index_name: NOTES_INDEX.to_string(),
        }
    }
}

#[async_trait]
impl SearchBackend for AlgoliaSearchBackend {
    async fn search(&self, api_key: &str, query: &SearchQuery) -> Result<SearchResponse> {
        self.client
            .with_api_key(api_key)
            .search(&self.index_name, query)
            .await
    }
}

enum KeySource {
    /// Keys issued per user and cached in a single slot.
    Scoped(ClientKeyCache),
    /// A public search key used as is; no sign-in, no issuance.
    Public(String),
}

/// Client-side search session owning the cached scoped key.
pub struct SearchSession {
    keys: KeySource,
    backend: Arc<dyn SearchBackend>,
    hits_per_page: usize,
}

impl SearchSession {
    pub fn authenticated(cache: ClientKeyCache, backend: Arc<dyn SearchBackend>) -> Self {
        SearchSession {
            keys: KeySource::Scoped(cache),
            backend,
            hits_per_page: DEFAULT_HITS_PER_PAGE,
        }
    }

    pub fn unauthenticated(public_key: impl Into<String>, backend: Arc<dyn SearchBackend>) -> Self {
        SearchSession {
            keys: KeySource::Public(public_key.into()),
            backend,
            hits_per_page: DEFAULT_HITS_PER_PAGE,
        }
    }

    pub fn with_hits_per_page(mut self, hits_per_page: usize) -> Self {
        self.hits_per_page = hits_per_page;
        self
    }

    pub fn key_cache(&self) -> Option<&ClientKeyCache> {
        match self.keys {
            KeySource::Scoped(ref cache) => Some(cache),
            KeySource::Public(_) => None,
        }
    }

    /// Searches for `text`.
    ///
    /// With a scoped key, a failed search discards the key, fetches a fresh
    /// one and retries once. The second failure is returned.
    pub async fn search(&self, text: &str) -> Result<SearchResponse> {
        let query = SearchQuery::new(text).with_hits_per_page(self.hits_per_page);

        let cache = match self.keys {
            KeySource::Public(ref key) => return self.backend.search(key, &query).await,
            KeySource::Scoped(ref cache) => cache,
        };

        let key = cache.get_key().await?;
        let first_error = match self.backend.search(key.as_str(), &query).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        tracing::warn!(error = %first_error, "Search failed, refreshing key");

        cache.invalidate(&key).await;
        let fresh = cache.get_key().await?;
        self.backend
            .search(fresh.as_str(), &query)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Search failed after key refresh"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{CountingIdentity, CountingIssuer};
    use crate::cache::CachedKey;
    use notesearch::error::NoteSearchError;
    use notesearch::types::ScopedSearchKey;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fails searches made with any key listed in `rejected`.
    #[derive(Default)]
    struct RecordingBackend {
        rejected: Vec<&'static str>,
        calls: AtomicUsize,
        keys_seen: Mutex<Vec<String>>,
        queries_seen: Mutex<Vec<SearchQuery>>,
    }

    impl RecordingBackend {
        fn rejecting(rejected: Vec<&'static str>) -> Self {
            RecordingBackend {
                rejected,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl SearchBackend for RecordingBackend {
        async fn search(&self, api_key: &str, query: &SearchQuery) -> Result<SearchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.keys_seen.lock().unwrap().push(api_key.to_string());
            self.queries_seen.lock().unwrap().push(query.clone());
            if self.rejected.contains(&api_key) {
                return Err(NoteSearchError::SearchQuery {
                    status: Some(403),
                    message: "Invalid Application-ID or API key".into(),
                });
            }
            Ok(SearchResponse {
                hits: vec![],
                nb_hits: 0,
                page: 0,
                hits_per_page: query.hits_per_page.unwrap_or_default(),
                query: query.query.clone(),
            })
        }
    }

    fn session(
        backend: Arc<RecordingBackend>,
    ) -> (Arc<CountingIdentity>, Arc<CountingIssuer>, SearchSession) {
        let identity = Arc::new(CountingIdentity::default());
        let issuer = Arc::new(CountingIssuer::default());
        let cache = ClientKeyCache::new(identity.clone(), issuer.clone());
        (identity, issuer, SearchSession::authenticated(cache, backend))
    }

    #[tokio::test]
    async fn successful_search_reuses_cached_key() {
        let backend = Arc::new(RecordingBackend::default());
        let (identity, issuer, session) = session(backend.clone());

        session.search("hello").await.unwrap();
        session.search("world").await.unwrap();

        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*backend.keys_seen.lock().unwrap(), vec!["key-1", "key-1"]);
    }

    #[tokio::test]
    async fn requests_five_hits_per_page_by_default() {
        let backend = Arc::new(RecordingBackend::default());
        let (_, _, session) = session(backend.clone());

        let resp = session.search("hello").await.unwrap();
        assert_eq!(resp.hits_per_page, 5);
        assert_eq!(backend.queries_seen.lock().unwrap()[0].hits_per_page, Some(5));
    }

    #[tokio::test]
    async fn stale_key_is_refreshed_and_retried_once() {
        let backend = Arc::new(RecordingBackend::rejecting(vec!["key-1"]));
        let (_, issuer, session) = session(backend.clone());

        session.search("hello").await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*backend.keys_seen.lock().unwrap(), vec!["key-1", "key-2"]);
        assert_eq!(
            session.key_cache().unwrap().state().await,
            CachedKey::Cached(ScopedSearchKey::new("key-2"))
        );
    }

    #[tokio::test]
    async fn second_failure_is_final() {
        let backend = Arc::new(RecordingBackend::rejecting(vec!["key-1", "key-2", "key-3"]));
        let (_, issuer, session) = session(backend.clone());

        let err = session.search("hello").await.unwrap_err();
        assert!(matches!(err, NoteSearchError::SearchQuery { status: Some(403), .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn issuance_failure_during_refresh_surfaces() {
        let backend = Arc::new(RecordingBackend::rejecting(vec!["static"]));
        let issuer = Arc::new(CountingIssuer {
            fail: true,
            ..Default::default()
        });
        let cache = ClientKeyCache::new(Arc::new(CountingIdentity::default()), issuer.clone());
        let session = SearchSession::authenticated(cache, backend.clone());

        let err = session.search("hello").await.unwrap_err();
        assert!(matches!(err, NoteSearchError::KeyIssuance(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn public_key_search_skips_sign_in_and_retry() {
        let backend = Arc::new(RecordingBackend::rejecting(vec!["public"]));
        let session = SearchSession::unauthenticated("public", backend.clone());

        assert!(session.search("hello").await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(session.key_cache().is_none());
    }

    #[tokio::test]
    async fn algolia_backend_sends_given_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/1/indexes/notes/query"))
            .and(header("X-Algolia-API-Key", "scoped-key"))
            .and(body_json(json!({"params": "query=hello&hitsPerPage=5"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": [{"objectID": "n1", "author": "u1", "text": "hello"}],
                "nbHits": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = AlgoliaClient::new("APP", "unused").with_base_url(server.uri());
        let backend = AlgoliaSearchBackend::new(client);
        let resp = backend
            .search("scoped-key", &SearchQuery::new("hello").with_hits_per_page(5))
            .await
            .unwrap();
        assert_eq!(resp.hits[0].get_str("text"), Some("hello"));
    }
}
