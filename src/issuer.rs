//! Per-subject secured search keys.
//!
//! The issuer never persists or caches keys and never takes restrictions from
//! the caller: the filter is always `author:<subject>` for the verified subject.
//! Enforcing that filter at query time is the index backend's job.

use chrono::Utc;
use std::time::Duration;

use crate::config::AlgoliaConfig;
use crate::error::Result;
use crate::filter::quote_facet_value;
use crate::secured_key::{generate_secured_api_key, SecuredKeyParams};
use crate::types::{ScopedSearchKey, SubjectId, AUTHOR_FIELD, NOTES_INDEX};

#[derive(Debug, Clone)]
pub struct ScopedKeyIssuer {
    algolia: AlgoliaConfig,
    index_name: String,
    validity: Option<Duration>,
}

impl ScopedKeyIssuer {
    pub fn new(algolia: AlgoliaConfig) -> Self {
        ScopedKeyIssuer {
            algolia,
            index_name: NOTES_INDEX.to_string(),
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: Option<Duration>) -> Self {
        self.validity = validity;
        self
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Restrictions baked into the key for `subject`.
    pub fn params_for(&self, subject: &SubjectId) -> SecuredKeyParams {
        SecuredKeyParams {
            filters: Some(format!(
                "{}:{}",
                AUTHOR_FIELD,
                quote_facet_value(subject.as_str())
            )),
            restrict_indices: vec![self.index_name.clone()],
            user_token: Some(subject.as_str().to_string()),
            valid_until: self
                .validity
                .map(|v| Utc::now().timestamp() + v.as_secs() as i64),
            hits_per_page: None,
        }
    }

    pub fn issue(&self, subject: &SubjectId) -> Result<ScopedSearchKey> {
        let parent = self.algolia.require_search_key()?;
        let params = self.params_for(subject);
        let key = generate_secured_api_key(parent, &params.to_query_string())?;
        tracing::debug!(subject = %subject, index = %self.index_name, "Issued scoped search key");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NoteSearchError;
    use crate::secured_key::validate_secured_key;

    fn issuer() -> ScopedKeyIssuer {
        ScopedKeyIssuer::new(AlgoliaConfig {
            app_id: Some("APP".into()),
            api_key: Some("admin-key".into()),
            search_key: Some("search-key".into()),
            host: None,
        })
    }

    fn subject(id: &str) -> SubjectId {
        SubjectId::new(id).unwrap()
    }

    #[test]
    fn key_embeds_subject_filter_index_and_token() {
        let key = issuer().issue(&subject("u1")).unwrap();
        let r = validate_secured_key(key.as_str(), ["search-key"], Utc::now().timestamp()).unwrap();
        assert_eq!(r.filters.as_deref(), Some("author:u1"));
        assert_eq!(r.restrict_indices, Some(vec!["notes".to_string()]));
        assert_eq!(r.user_token.as_deref(), Some("u1"));
        assert!(r.valid_until.is_none());
    }

    #[test]
    fn key_is_not_derived_from_admin_key() {
        let key = issuer().issue(&subject("u1")).unwrap();
        assert!(validate_secured_key(key.as_str(), ["admin-key"], Utc::now().timestamp()).is_none());
    }

    #[test]
    fn repeated_issuance_keeps_same_scope() {
        let i = issuer();
        let k1 = i.issue(&subject("u1")).unwrap();
        let k2 = i.issue(&subject("u1")).unwrap();
        let now = Utc::now().timestamp();
        let r1 = validate_secured_key(k1.as_str(), ["search-key"], now).unwrap();
        let r2 = validate_secured_key(k2.as_str(), ["search-key"], now).unwrap();
        assert_eq!(r1.filters, r2.filters);
        assert_eq!(r1.restrict_indices, r2.restrict_indices);
    }

    #[test]
    fn different_subjects_get_different_keys() {
        let i = issuer();
        assert_ne!(
            i.issue(&subject("u1")).unwrap(),
            i.issue(&subject("u2")).unwrap()
        );
    }

    #[test]
    fn unusual_subject_is_quoted() {
        let params = issuer().params_for(&subject("u1 OR author:u2"));
        assert_eq!(params.filters.as_deref(), Some("author:\"u1 OR author:u2\""));
    }

    #[test]
    fn validity_sets_valid_until() {
        let i = issuer().with_validity(Some(Duration::from_secs(600)));
        let params = i.params_for(&subject("u1"));
        let until = params.valid_until.unwrap();
        let now = Utc::now().timestamp();
        assert!(until > now && until <= now + 600);
    }

    #[test]
    fn missing_search_key_is_config_error() {
        let i = ScopedKeyIssuer::new(AlgoliaConfig::default());
        let err = i.issue(&subject("u1")).unwrap_err();
        assert!(matches!(err, NoteSearchError::Config(_)));
    }
}
