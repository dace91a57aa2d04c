//! Search-index backends.
//!
//! [`SearchIndex`] is the write-and-query seam shared by the hosted Algolia
//! client and the in-process [`MemoryIndex`] emulator.

pub mod algolia;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{IndexRecord, SaveObjectResponse, SearchQuery, SearchResponse};

pub use algolia::AlgoliaClient;
pub use memory::{IndexAccess, KeyRing, MemoryIndex};

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Creates or replaces the record with `record.object_id`.
    async fn save_object(&self, index_name: &str, record: IndexRecord)
        -> Result<SaveObjectResponse>;

    /// Runs `query` with whatever credential the backend was built with.
    async fn search(&self, index_name: &str, query: &SearchQuery) -> Result<SearchResponse>;
}
