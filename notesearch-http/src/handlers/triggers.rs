use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use std::sync::Arc;

use notesearch::error::NoteSearchError;
use notesearch::secured_key::constant_time_eq;
use notesearch::sync::NoteCreatedEvent;
use notesearch::types::IndexRecord;

use super::AppState;

pub const TRIGGER_SECRET_HEADER: &str = "x-trigger-secret";

/// `POST /triggers/notes/:noteId/created`: delivery of a "document created"
/// event for `notes/{noteId}`. The body is the document's fields.
///
/// A 503 response asks the runtime to deliver the event again.
pub async fn note_created(
    State(state): State<Arc<AppState>>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(fields): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<IndexRecord>, NoteSearchError> {
    if let Some(ref expected) = state.trigger_secret {
        let presented = headers
            .get(TRIGGER_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(presented, expected) {
            tracing::warn!(note_id = %note_id, "Rejected trigger delivery with bad secret");
            return Err(NoteSearchError::invalid_credential("bad trigger secret"));
        }
    }

    let trigger = state.sync_trigger()?;
    let record = trigger
        .on_note_created(&NoteCreatedEvent::new(note_id, fields))
        .await?;
    Ok(Json(record))
}
