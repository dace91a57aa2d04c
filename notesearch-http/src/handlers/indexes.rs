//! Algolia-compatible object and query routes served by the local emulator.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::sync::Arc;

use notesearch::error::NoteSearchError;
use notesearch::filter::parse_filter;
use notesearch::index::IndexAccess;
use notesearch::types::{IndexRecord, SaveObjectResponse, SearchQuery, SearchResponse};

use super::EmulatorState;

pub async fn put_object(
    State(state): State<Arc<EmulatorState>>,
    Path((index_name, object_id)): Path<(String, String)>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<SaveObjectResponse>, NoteSearchError> {
    let record = IndexRecord::from_fields(object_id, body);
    let resp = state.index.upsert(&index_name, record);
    tracing::debug!(index = %index_name, object_id = %resp.object_id, "Object saved");
    Ok(Json(resp))
}

/// Secured keys only see objects their filter matches; others get 404.
pub async fn get_object(
    State(state): State<Arc<EmulatorState>>,
    Extension(access): Extension<IndexAccess>,
    Path((index_name, object_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, NoteSearchError> {
    let record = state.index.get_object(&index_name, &object_id)?;

    if let IndexAccess::Secured(ref restrictions) = access {
        if !restrictions.allows_index(&index_name) {
            return Err(NoteSearchError::IndexNotAllowed(index_name));
        }
        if let Some(ref forced) = restrictions.filters {
            if !parse_filter(forced)?.matches(&record.fields) {
                return Err(NoteSearchError::ObjectNotFound(object_id));
            }
        }
    }

    Ok(Json(record.to_json()))
}

pub async fn query_index(
    State(state): State<Arc<EmulatorState>>,
    Extension(access): Extension<IndexAccess>,
    Path(index_name): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SearchResponse>, NoteSearchError> {
    let query = SearchQuery::from_body(&body)?;
    let resp = state.index.search_with_access(&index_name, &query, &access)?;
    tracing::debug!(
        index = %index_name,
        nb_hits = resp.nb_hits,
        secured = matches!(access, IndexAccess::Secured(_)),
        "Query served"
    );
    Ok(Json(resp))
}
