use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NoteSearchError, Result};

/// Index that mirrors the `notes` collection.
pub const NOTES_INDEX: &str = "notes";
/// Primary-store collection whose creations are mirrored.
pub const NOTES_COLLECTION: &str = "notes";
/// Field holding the owning subject on every note.
pub const AUTHOR_FIELD: &str = "author";
pub const DEFAULT_HITS_PER_PAGE: usize = 5;

/// Stable identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(NoteSearchError::invalid_credential("empty subject id"));
        }
        Ok(SubjectId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A note as written to the primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub author: String,
    pub text: String,
}

impl Note {
    /// Document fields as the primary store holds them (the id lives in the path).
    pub fn fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        fields.insert(
            AUTHOR_FIELD.to_string(),
            serde_json::Value::String(self.author.clone()),
        );
        fields.insert(
            "text".to_string(),
            serde_json::Value::String(self.text.clone()),
        );
        fields
    }
}

/// Derived search credential. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopedSearchKey(String);

impl ScopedSearchKey {
    pub fn new(value: impl Into<String>) -> Self {
        ScopedSearchKey(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ScopedSearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopedSearchKey(<{} bytes>)", self.0.len())
    }
}

/// Body of `GET /getSearchKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchKeyResponse {
    pub key: ScopedSearchKey,
}

/// A record in the search index: arbitrary fields keyed by `objectID`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl IndexRecord {
    /// Builds a record from document fields. Any `objectID` carried in the
    /// fields is replaced by `object_id`.
    pub fn from_fields(
        object_id: impl Into<String>,
        mut fields: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        fields.remove("objectID");
        IndexRecord {
            object_id: object_id.into(),
            fields,
        }
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        obj.insert(
            "objectID".to_string(),
            serde_json::Value::String(self.object_id.clone()),
        );
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(obj)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveObjectResponse {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(default)]
    #[serde(rename = "taskID")]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Query sent to the index. Serialized in the Algolia search body shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    #[serde(default)]
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits_per_page: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        SearchQuery {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_hits_per_page(mut self, hits_per_page: usize) -> Self {
        self.hits_per_page = Some(hits_per_page);
        self
    }

    /// Encodes the query as an Algolia `params` string.
    pub fn to_params(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        ser.append_pair("query", &self.query);
        if let Some(hpp) = self.hits_per_page {
            ser.append_pair("hitsPerPage", &hpp.to_string());
        }
        if let Some(ref filters) = self.filters {
            ser.append_pair("filters", filters);
        }
        if let Some(ref token) = self.user_token {
            ser.append_pair("userToken", token);
        }
        if let Some(page) = self.page {
            ser.append_pair("page", &page.to_string());
        }
        ser.finish()
    }

    /// Reads an Algolia search body: either `{"params": "..."}` or plain fields.
    /// Plain fields win over the same key inside `params`.
    pub fn from_body(body: &serde_json::Value) -> Result<Self> {
        let mut query: SearchQuery = serde_json::from_value(body.clone())?;
        if let Some(params) = body.get("params").and_then(|p| p.as_str()) {
            for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
                match key.as_ref() {
                    "query" if body.get("query").is_none() => query.query = value.into_owned(),
                    "hitsPerPage" if query.hits_per_page.is_none() => {
                        query.hits_per_page = value.parse().ok()
                    }
                    "filters" if query.filters.is_none() => {
                        query.filters = Some(value.into_owned())
                    }
                    "userToken" if query.user_token.is_none() => {
                        query.user_token = Some(value.into_owned())
                    }
                    "page" if query.page.is_none() => query.page = value.parse().ok(),
                    _ => {}
                }
            }
        }
        Ok(query)
    }
}

/// One search hit: the stored record plus `_highlightResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "objectID")]
    pub object_id: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SearchHit {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Highlighted value of `field`, if the index returned one.
    pub fn highlighted(&self, field: &str) -> Option<&str> {
        self.fields
            .get("_highlightResult")?
            .get(field)?
            .get("value")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    #[serde(default)]
    pub nb_hits: usize,
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub hits_per_page: usize,
    #[serde(default)]
    pub query: String,
}
