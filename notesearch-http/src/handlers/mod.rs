use std::sync::Arc;

use notesearch::error::{NoteSearchError, Result};
use notesearch::index::MemoryIndex;
use notesearch::{IndexSyncTrigger, NoteStore, RetryPolicy, ScopedKeyIssuer};

pub mod health;
pub mod indexes;
pub mod notes;
pub mod search_key;
pub mod triggers;

pub struct AppState {
    pub issuer: ScopedKeyIssuer,
    /// `None` when the index admin credentials are not configured.
    pub sync_trigger: Option<IndexSyncTrigger>,
    pub notes: NoteStore,
    pub retry_policy: RetryPolicy,
    pub trigger_secret: Option<String>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn sync_trigger(&self) -> Result<&IndexSyncTrigger> {
        self.sync_trigger.as_ref().ok_or_else(|| {
            NoteSearchError::Config("algolia.app_id and algolia.api_key are required".to_string())
        })
    }
}

/// State of the local Algolia-compatible index.
pub struct EmulatorState {
    pub index: Arc<MemoryIndex>,
}

pub use health::health;
pub use indexes::{get_object, put_object, query_index};
pub use notes::create_note;
pub use search_key::get_search_key;
pub use triggers::note_created;
