use axum::{extract::State, Extension, Json};
use std::sync::Arc;

use notesearch::error::NoteSearchError;
use notesearch::types::SearchKeyResponse;

use super::AppState;
use crate::identity::VerifiedIdentity;

/// `GET /getSearchKey`: a secured search key scoped to the caller's notes.
///
/// Query parameters are never read, so a caller cannot widen the filter.
pub async fn get_search_key(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
) -> Result<Json<SearchKeyResponse>, NoteSearchError> {
    let key = state.issuer.issue(&identity.subject).map_err(|e| {
        tracing::error!(subject = %identity.subject, "Search key issuance failed: {}", e);
        e
    })?;
    Ok(Json(SearchKeyResponse { key }))
}
