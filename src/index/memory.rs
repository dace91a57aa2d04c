//! In-process, Algolia-compatible index used for local development and tests.
//!
//! It authenticates keys the way the hosted backend does: the admin key may
//! write, the search key may query, and secured keys derived from the search
//! key may query with their embedded restrictions forced onto every request.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::SearchIndex;
use crate::error::{NoteSearchError, Result};
use crate::filter::{parse_filter, Filter};
use crate::secured_key::{constant_time_eq, validate_secured_key, SecuredKeyRestrictions};
use crate::types::{IndexRecord, SaveObjectResponse, SearchHit, SearchQuery, SearchResponse};

const DEFAULT_HITS_PER_PAGE: usize = 20;
const MAX_HITS_PER_PAGE: usize = 1000;

/// What a presented API key is allowed to do.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexAccess {
    Admin,
    Search,
    Secured(SecuredKeyRestrictions),
}

impl IndexAccess {
    pub fn can_write(&self) -> bool {
        matches!(self, IndexAccess::Admin)
    }
}

/// The keys an index backend recognises.
#[derive(Clone)]
pub struct KeyRing {
    admin_key: String,
    search_key: String,
}

impl KeyRing {
    pub fn new(admin_key: impl Into<String>, search_key: impl Into<String>) -> Self {
        KeyRing {
            admin_key: admin_key.into(),
            search_key: search_key.into(),
        }
    }

    /// Resolves `api_key`. Secured keys are only accepted when derived from the
    /// search key; the admin key is never a valid parent.
    pub fn authorize(&self, api_key: &str) -> Result<IndexAccess> {
        if api_key.is_empty() {
            return Err(NoteSearchError::MissingCredential);
        }
        if constant_time_eq(api_key, &self.admin_key) {
            return Ok(IndexAccess::Admin);
        }
        if constant_time_eq(api_key, &self.search_key) {
            return Ok(IndexAccess::Search);
        }
        validate_secured_key(api_key, [self.search_key.as_str()], Utc::now().timestamp())
            .map(IndexAccess::Secured)
            .ok_or_else(|| NoteSearchError::invalid_credential("Invalid Application-ID or API key"))
    }
}

#[derive(Default)]
pub struct MemoryIndex {
    indexes: DashMap<String, BTreeMap<String, IndexRecord>>,
    next_task_id: AtomicI64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, index_name: &str, record: IndexRecord) -> SaveObjectResponse {
        let object_id = record.object_id.clone();
        self.indexes
            .entry(index_name.to_string())
            .or_default()
            .insert(object_id.clone(), record);
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        SaveObjectResponse {
            object_id,
            task_id: Some(task_id),
            updated_at: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn get_object(&self, index_name: &str, object_id: &str) -> Result<IndexRecord> {
        self.indexes
            .get(index_name)
            .and_then(|records| records.get(object_id).cloned())
            .ok_or_else(|| NoteSearchError::ObjectNotFound(object_id.to_string()))
    }

    pub fn len(&self, index_name: &str) -> usize {
        self.indexes.get(index_name).map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, index_name: &str) -> bool {
        self.len(index_name) == 0
    }

    /// Runs `query` under `access`. Secured restrictions are merged into the
    /// request before evaluation and cannot be widened by the query.
    pub fn search_with_access(
        &self,
        index_name: &str,
        query: &SearchQuery,
        access: &IndexAccess,
    ) -> Result<SearchResponse> {
        let mut query = query.clone();
        let mut forced = None;
        if let IndexAccess::Secured(ref restrictions) = access {
            if !restrictions.allows_index(index_name) {
                return Err(NoteSearchError::IndexNotAllowed(index_name.to_string()));
            }
            merge_secured_restrictions(&mut query, restrictions);
            forced = restrictions.filters.as_deref();
        }

        let filter = combined_filter(query.filters.as_deref(), forced)?;
        let terms = query_terms(&query.query);
        let hits_per_page = query
            .hits_per_page
            .unwrap_or(DEFAULT_HITS_PER_PAGE)
            .min(MAX_HITS_PER_PAGE);
        let page = query.page.unwrap_or(0);

        let matching: Vec<SearchHit> = match self.indexes.get(index_name) {
            Some(records) => records
                .values()
                .filter(|r| filter.as_ref().map_or(true, |f| f.matches(&r.fields)))
                .filter(|r| matches_terms(r, &terms))
                .map(|r| to_hit(r, &terms))
                .collect(),
            None => Vec::new(),
        };

        let nb_hits = matching.len();
        let hits = matching
            .into_iter()
            .skip(page.saturating_mul(hits_per_page))
            .take(hits_per_page)
            .collect();

        Ok(SearchResponse {
            hits,
            nb_hits,
            page,
            hits_per_page,
            query: query.query,
        })
    }
}

/// Forces a secured key's hit cap and user token onto a query. Its filter is
/// applied separately by [`combined_filter`].
pub fn merge_secured_restrictions(query: &mut SearchQuery, restrictions: &SecuredKeyRestrictions) {
    if let Some(hpp) = restrictions.hits_per_page {
        if query.hits_per_page.map_or(true, |h| h > hpp) {
            query.hits_per_page = Some(hpp);
        }
    }
    if let Some(ref token) = restrictions.user_token {
        query.user_token = Some(token.clone());
    }
}

/// Parses the caller's filter and a key's forced filter independently and
/// requires both. The forced filter is never spliced into the caller's text.
pub fn combined_filter(caller: Option<&str>, forced: Option<&str>) -> Result<Option<Filter>> {
    let parse = |f: Option<&str>| match f {
        Some(f) if !f.trim().is_empty() => parse_filter(f).map(Some),
        _ => Ok(None),
    };
    Ok(match (parse(caller)?, parse(forced)?) {
        (Some(caller), Some(forced)) => Some(Filter::And(vec![caller, forced])),
        (caller, forced) => caller.or(forced),
    })
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

/// Every term must prefix-match a word of some string attribute.
fn matches_terms(record: &IndexRecord, terms: &[String]) -> bool {
    terms.iter().all(|term| {
        record
            .fields
            .values()
            .filter_map(|v| v.as_str())
            .any(|text| words(text).any(|w| w.starts_with(term.as_str())))
    })
}

fn to_hit(record: &IndexRecord, terms: &[String]) -> SearchHit {
    let mut highlight = serde_json::Map::new();
    for (field, value) in &record.fields {
        if let Some(text) = value.as_str() {
            let (value, matched) = highlight_text(text, terms);
            highlight.insert(
                field.clone(),
                serde_json::json!({
                    "value": value,
                    "matchLevel": if matched { "full" } else { "none" },
                }),
            );
        }
    }
    let mut fields = record.fields.clone();
    fields.insert(
        "_highlightResult".to_string(),
        serde_json::Value::Object(highlight),
    );
    SearchHit {
        object_id: record.object_id.clone(),
        fields,
    }
}

fn highlight_text(text: &str, terms: &[String]) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut matched = false;
    let mut word = String::new();

    let mut flush = |word: &mut String, out: &mut String| {
        if word.is_empty() {
            return;
        }
        let lower = word.to_lowercase();
        if terms.iter().any(|t| lower.starts_with(t.as_str())) {
            matched = true;
            out.push_str("<em>");
            out.push_str(word);
            out.push_str("</em>");
        } else {
            out.push_str(word);
        }
        word.clear();
    };

    for c in text.chars() {
        if c.is_alphanumeric() {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    (out, matched)
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn save_object(
        &self,
        index_name: &str,
        record: IndexRecord,
    ) -> Result<SaveObjectResponse> {
        Ok(self.upsert(index_name, record))
    }

    async fn search(&self, index_name: &str, query: &SearchQuery) -> Result<SearchResponse> {
        self.search_with_access(index_name, query, &IndexAccess::Admin)
    }
}
