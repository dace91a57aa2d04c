//! Per-user scoped search keys and note-to-index synchronization for an
//! Algolia-compatible search backend.

pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod issuer;
pub mod retry;
pub mod secured_key;
pub mod store;
pub mod sync;
pub mod types;

pub use config::{AlgoliaConfig, RuntimeConfig};
pub use error::{NoteSearchError, Result};
pub use index::{AlgoliaClient, IndexAccess, KeyRing, MemoryIndex, SearchIndex};
pub use issuer::ScopedKeyIssuer;
pub use retry::{run_with_retry, RetryPolicy};
pub use store::NoteStore;
pub use sync::{IndexSyncTrigger, NoteCreatedEvent};
pub use types::{
    IndexRecord, Note, ScopedSearchKey, SearchHit, SearchKeyResponse, SearchQuery,
    SearchResponse, SubjectId, NOTES_INDEX,
};
