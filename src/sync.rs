//! Mirrors newly created notes into the search index.
//!
//! Only creation is mirrored. Updates and deletes in the primary store leave
//! the index record untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{NoteSearchError, Result};
use crate::index::SearchIndex;
use crate::types::{IndexRecord, NOTES_INDEX};

/// A "document created" event for `notes/{noteId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCreatedEvent {
    pub note_id: String,
    /// Document fields as stored, without the id.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl NoteCreatedEvent {
    pub fn new(
        note_id: impl Into<String>,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        NoteCreatedEvent {
            note_id: note_id.into(),
            fields,
        }
    }

    /// The index record for this note: its fields plus `objectID = noteId`.
    pub fn to_record(&self) -> Result<IndexRecord> {
        if self.note_id.trim().is_empty() {
            return Err(NoteSearchError::InvalidDocument(
                "note id must not be empty".to_string(),
            ));
        }
        Ok(IndexRecord::from_fields(
            self.note_id.clone(),
            self.fields.clone(),
        ))
    }
}

#[derive(Clone)]
pub struct IndexSyncTrigger {
    index: Arc<dyn SearchIndex>,
    index_name: String,
}

impl IndexSyncTrigger {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        IndexSyncTrigger {
            index,
            index_name: NOTES_INDEX.to_string(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Upserts the created note. Errors are returned to the caller; a
    /// transient error means the event should be delivered again.
    pub async fn on_note_created(&self, event: &NoteCreatedEvent) -> Result<IndexRecord> {
        let record = event.to_record()?;
        match self.index.save_object(&self.index_name, record.clone()).await {
            Ok(resp) => {
                tracing::info!(
                    object_id = %resp.object_id,
                    index = %self.index_name,
                    task_id = ?resp.task_id,
                    "Mirrored note into search index"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::error!(
                    object_id = %record.object_id,
                    index = %self.index_name,
                    transient = e.is_transient(),
                    "Index upsert failed: {}",
                    e
                );
                Err(e)
            }
        }
    }
}
