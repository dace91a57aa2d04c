use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{NoteSearchError, Result};

/// Credentials for the hosted search index, in the functions-config shape
/// `{"algolia": {"app_id": ..., "api_key": ..., "search_key": ...}}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlgoliaConfig {
    #[serde(default)]
    pub app_id: Option<String>,
    /// Admin key, used only for index writes.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Parent key of every derived search key.
    #[serde(default)]
    pub search_key: Option<String>,
    /// Base URL override (emulators, tests). Defaults to the hosted endpoints.
    #[serde(default)]
    pub host: Option<String>,
}

impl AlgoliaConfig {
    pub fn require_app_id(&self) -> Result<&str> {
        non_empty(&self.app_id, "algolia.app_id")
    }

    pub fn require_api_key(&self) -> Result<&str> {
        non_empty(&self.api_key, "algolia.api_key")
    }

    pub fn require_search_key(&self) -> Result<&str> {
        non_empty(&self.search_key, "algolia.search_key")
    }

    fn apply_env(&mut self) {
        override_from_env(&mut self.app_id, "ALGOLIA_APP_ID");
        override_from_env(&mut self.api_key, "ALGOLIA_API_KEY");
        override_from_env(&mut self.search_key, "ALGOLIA_SEARCH_KEY");
        override_from_env(&mut self.host, "ALGOLIA_HOST");
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub algolia: AlgoliaConfig,
    /// Lifetime stamped into issued keys as `validUntil`. `None` issues keys
    /// without expiry.
    #[serde(default, with = "opt_secs")]
    pub key_validity: Option<Duration>,
    /// Shared secret the hosting runtime presents when delivering trigger events.
    #[serde(default)]
    pub trigger_secret: Option<String>,
}

impl RuntimeConfig {
    /// Loads `path` (functions-config JSON) if it exists, then applies env overrides.
    /// A missing or unreadable file is logged and treated as empty so that
    /// misconfiguration surfaces per request instead of at boot.
    pub fn load(path: &Path) -> Self {
        let mut config = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str::<RuntimeConfig>(&content) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "Loaded runtime config");
                        config
                    }
                    Err(e) => {
                        tracing::error!("Failed to parse {}: {}, using defaults", path.display(), e);
                        RuntimeConfig::default()
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to read {}: {}, using defaults", path.display(), e);
                    RuntimeConfig::default()
                }
            }
        } else {
            tracing::info!(
                "No runtime config at {}, reading environment only",
                path.display()
            );
            RuntimeConfig::default()
        };

        config.apply_env();
        config
    }

    pub fn from_env() -> Self {
        let mut config = RuntimeConfig::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        self.algolia.apply_env();
        if let Some(secs) = std::env::var("NOTESEARCH_KEY_VALIDITY_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            self.key_validity = (secs > 0).then(|| Duration::from_secs(secs));
        }
        override_from_env(&mut self.trigger_secret, "NOTESEARCH_TRIGGER_SECRET");
    }

    /// Names of required settings that are absent, for startup diagnostics.
    pub fn missing_settings(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.algolia.require_app_id().is_err() {
            missing.push("algolia.app_id");
        }
        if self.algolia.require_api_key().is_err() {
            missing.push("algolia.api_key");
        }
        if self.algolia.require_search_key().is_err() {
            missing.push("algolia.search_key");
        }
        missing
    }
}

fn non_empty<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NoteSearchError::Config(format!("{} is not set", name)))
}

fn override_from_env(slot: &mut Option<String>, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            *slot = Some(value.trim().to_string());
        }
    }
}

mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(d)?;
        Ok(secs.filter(|s| *s > 0).map(Duration::from_secs))
    }
}
