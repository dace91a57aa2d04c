use async_trait::async_trait;
use jsonwebtoken::{EncodingKey, Header};
use notesearch::error::{NoteSearchError, Result};
use notesearch::index::{KeyRing, MemoryIndex, SearchIndex};
use notesearch::types::{IndexRecord, SaveObjectResponse, SearchQuery, SearchResponse};
use notesearch::{AlgoliaConfig, RetryPolicy, RuntimeConfig};
use notesearch_http::{build_app_state, build_router, Emulator, IdentityVerifier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const APP_ID: &str = "notesearch-test";
pub const ADMIN_KEY: &str = "admin_key_1234567890abcdef";
pub const SEARCH_KEY: &str = "search_key_1234567890abcdef";
pub const DEV_SECRET: &str = "integration-test-secret";

/// A notesearch server on an ephemeral port, serving its own index emulator.
#[allow(dead_code)]
pub struct TestServer {
    pub base_url: String,
    pub index: Arc<MemoryIndex>,
    pub config: RuntimeConfig,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Algolia config pointing at this server's emulator.
    pub fn algolia(&self) -> AlgoliaConfig {
        self.config.algolia.clone()
    }
}

/// Upserts fail with a 503 from the index until `failures` have been spent,
/// then go through to the wrapped emulator index.
#[allow(dead_code)]
pub struct FlakyIndex {
    inner: Arc<MemoryIndex>,
    failures: AtomicUsize,
    pub save_attempts: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyIndex {
    pub fn new(inner: Arc<MemoryIndex>, failures: usize) -> Self {
        FlakyIndex {
            inner,
            failures: AtomicUsize::new(failures),
            save_attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for FlakyIndex {
    async fn save_object(&self, index_name: &str, record: IndexRecord) -> Result<SaveObjectResponse> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NoteSearchError::SyncUpsert {
                object_id: record.object_id,
                status: Some(503),
                message: "index temporarily unavailable".into(),
            });
        }
        self.inner.save_object(index_name, record).await
    }

    async fn search(&self, index_name: &str, query: &SearchQuery) -> Result<SearchResponse> {
        self.inner.search(index_name, query).await
    }
}

pub async fn spawn_server() -> TestServer {
    spawn(None, None).await
}

pub async fn spawn_server_with_trigger_secret(trigger_secret: Option<&str>) -> TestServer {
    spawn(trigger_secret, None).await
}

/// Like [`spawn_server`], but note mirroring goes through a [`FlakyIndex`]
/// that fails `failures` times before reaching the emulator.
#[allow(dead_code)]
pub async fn spawn_server_with_flaky_index(failures: usize) -> (TestServer, Arc<FlakyIndex>) {
    let index = Arc::new(MemoryIndex::new());
    let flaky = Arc::new(FlakyIndex::new(index.clone(), failures));
    let server = spawn(None, Some((index, flaky.clone() as Arc<dyn SearchIndex>))).await;
    (server, flaky)
}

async fn spawn(
    trigger_secret: Option<&str>,
    indexes: Option<(Arc<MemoryIndex>, Arc<dyn SearchIndex>)>,
) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let config = RuntimeConfig {
        algolia: AlgoliaConfig {
            app_id: Some(APP_ID.to_string()),
            api_key: Some(ADMIN_KEY.to_string()),
            search_key: Some(SEARCH_KEY.to_string()),
            host: Some(base_url.clone()),
        },
        key_validity: None,
        trigger_secret: trigger_secret.map(String::from),
    };

    let (index, sync_index) = indexes.unwrap_or_else(|| {
        let index = Arc::new(MemoryIndex::new());
        (index.clone(), index as Arc<dyn SearchIndex>)
    });
    let mut state = build_app_state(&config, Some(sync_index));
    state.retry_policy = RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    };
    let verifier = Arc::new(IdentityVerifier::shared_secret(None, DEV_SECRET.as_bytes()));
    let emulator = Emulator::new(APP_ID, KeyRing::new(ADMIN_KEY, SEARCH_KEY), index.clone());
    let app = build_router(Arc::new(state), verifier, Some(emulator));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url,
        index,
        config,
    }
}

/// HS256 ID token for `subject`, accepted by the test server's verifier.
pub fn id_token(subject: &str) -> String {
    id_token_with_secret(subject, DEV_SECRET)
}

pub fn id_token_with_secret(subject: &str, secret: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "sub": subject,
        "user_id": subject,
        "iat": now,
        "exp": now + 3600,
    });
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[allow(dead_code)]
pub async fn fetch_search_key(server: &TestServer, subject: &str) -> String {
    let resp = reqwest::Client::new()
        .get(server.url("/getSearchKey"))
        .bearer_auth(id_token(subject))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["key"].as_str().unwrap().to_string()
}

/// Delivers a "note created" event the way the hosting runtime would.
#[allow(dead_code)]
pub async fn deliver_note(server: &TestServer, note_id: &str, author: &str, text: &str) {
    let resp = reqwest::Client::new()
        .post(server.url(&format!("/triggers/notes/{}/created", note_id)))
        .json(&serde_json::json!({"author": author, "text": text}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200, "trigger delivery for {} failed", note_id);
}

/// Searches the emulator directly with `api_key`.
#[allow(dead_code)]
pub async fn search_with_key(
    server: &TestServer,
    api_key: &str,
    body: serde_json::Value,
) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.url("/1/indexes/notes/query"))
        .header("X-Algolia-Application-Id", APP_ID)
        .header("X-Algolia-API-Key", api_key)
        .json(&body)
        .send()
        .await
        .unwrap()
}
