use std::sync::Arc;

use notesearch::config::AlgoliaConfig;
use notesearch::error::{NoteSearchError, Result};
use notesearch::index::AlgoliaClient;

use crate::cache::ClientKeyCache;
use crate::identity::{IdTokenSource, PasswordSignIn, StaticIdToken};
use crate::issuer::HttpKeyIssuer;
use crate::search::{AlgoliaSearchBackend, SearchSession};

/// Client settings, read from the environment.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub algolia_app_id: Option<String>,
    /// Base URL override for the search index.
    pub algolia_host: Option<String>,
    /// Full URL of the `getSearchKey` endpoint.
    pub key_endpoint: Option<String>,
    /// When set, searches use this key directly and never sign in.
    pub public_search_key: Option<String>,
    pub web_api_key: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Identity Toolkit base URL override.
    pub identity_url: Option<String>,
    /// Pre-issued ID token, used instead of password sign-in.
    pub id_token: Option<String>,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ClientConfig {
    pub fn from_env() -> Self {
        ClientConfig {
            algolia_app_id: env_opt("ALGOLIA_APP_ID"),
            algolia_host: env_opt("ALGOLIA_HOST"),
            key_endpoint: env_opt("NOTESEARCH_KEY_ENDPOINT"),
            public_search_key: env_opt("NOTESEARCH_PUBLIC_SEARCH_KEY"),
            web_api_key: env_opt("NOTESEARCH_WEB_API_KEY"),
            email: env_opt("NOTESEARCH_TEST_USER_EMAIL"),
            password: env_opt("NOTESEARCH_TEST_USER_PASSWORD"),
            identity_url: env_opt("NOTESEARCH_IDENTITY_URL"),
            id_token: env_opt("NOTESEARCH_ID_TOKEN"),
        }
    }

    fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| NoteSearchError::Config(format!("{} is not set", name)))
    }

    fn identity(&self) -> Result<Arc<dyn IdTokenSource>> {
        if let Some(ref token) = self.id_token {
            return Ok(Arc::new(StaticIdToken::new(token.as_str())));
        }
        let sign_in = PasswordSignIn::new(
            Self::require(&self.web_api_key, "NOTESEARCH_WEB_API_KEY")?,
            Self::require(&self.email, "NOTESEARCH_TEST_USER_EMAIL")?,
            Self::require(&self.password, "NOTESEARCH_TEST_USER_PASSWORD")?,
        );
        Ok(Arc::new(match self.identity_url {
            Some(ref url) => sign_in.with_base_url(url.as_str()),
            None => sign_in,
        }))
    }
}

impl SearchSession {
    /// Builds a session from `config`. A public search key selects the
    /// unauthenticated path; otherwise the key endpoint and a way to obtain
    /// an ID token are required.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let algolia = AlgoliaConfig {
            app_id: config.algolia_app_id.clone(),
            host: config.algolia_host.clone(),
            ..Default::default()
        };
        let client = AlgoliaClient::searcher(&algolia, "")?;
        let backend = Arc::new(AlgoliaSearchBackend::new(client));

        if let Some(ref public_key) = config.public_search_key {
            tracing::info!("Using public search key");
            return Ok(SearchSession::unauthenticated(public_key.as_str(), backend));
        }

        let endpoint = ClientConfig::require(&config.key_endpoint, "NOTESEARCH_KEY_ENDPOINT")?;
        let cache = ClientKeyCache::new(config.identity()?, Arc::new(HttpKeyIssuer::new(endpoint)));
        Ok(SearchSession::authenticated(cache, backend))
    }
}
