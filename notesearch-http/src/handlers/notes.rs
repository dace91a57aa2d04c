use axum::{extract::State, http::StatusCode, Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

use notesearch::error::NoteSearchError;
use notesearch::retry::run_with_retry;
use notesearch::types::Note;

use super::AppState;
use crate::identity::VerifiedIdentity;

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub text: String,
}

/// `POST /notes`: writes a note owned by the caller to the local primary
/// store and fires the create trigger in the background.
///
/// The response does not wait for the index; mirroring is eventually
/// consistent and retried under the state's retry policy.
pub async fn create_note(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<VerifiedIdentity>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<(StatusCode, Json<Note>), NoteSearchError> {
    let (note, event) = state.notes.create(&identity.subject, req.text);
    tracing::info!(note_id = %note.id, author = %note.author, "Note created");

    let state = state.clone();
    tokio::spawn(async move {
        let trigger = match state.sync_trigger() {
            Ok(t) => t.clone(),
            Err(e) => {
                tracing::error!(note_id = %event.note_id, "Note not mirrored: {}", e);
                return;
            }
        };
        let result = run_with_retry(&state.retry_policy, "note_created", || {
            trigger.on_note_created(&event)
        })
        .await;
        if let Err(e) = result {
            tracing::error!(note_id = %event.note_id, "Note not mirrored: {}", e);
        }
    });

    Ok((StatusCode::CREATED, Json(note)))
}
