//! Single-slot cache of the scoped search key.
//!
//! The slot holds at most one key and never tracks expiry; a key is dropped
//! only after a search with it fails.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use notesearch::error::Result;
use notesearch::types::ScopedSearchKey;

use crate::identity::IdTokenSource;
use crate::issuer::KeyIssuer;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CachedKey {
    #[default]
    Empty,
    Cached(ScopedSearchKey),
}

pub struct ClientKeyCache {
    slot: RwLock<CachedKey>,
    /// Serializes fetches so concurrent misses make one round trip.
    fetch_lock: Mutex<()>,
    identity: Arc<dyn IdTokenSource>,
    issuer: Arc<dyn KeyIssuer>,
}

impl ClientKeyCache {
    pub fn new(identity: Arc<dyn IdTokenSource>, issuer: Arc<dyn KeyIssuer>) -> Self {
        ClientKeyCache {
            slot: RwLock::new(CachedKey::Empty),
            fetch_lock: Mutex::new(()),
            identity,
            issuer,
        }
    }

    pub async fn state(&self) -> CachedKey {
        self.slot.read().await.clone()
    }

    /// The cached key, or a freshly issued one when the slot is empty.
    pub async fn get_key(&self) -> Result<ScopedSearchKey> {
        if let CachedKey::Cached(ref key) = *self.slot.read().await {
            return Ok(key.clone());
        }

        let _fetching = self.fetch_lock.lock().await;
        if let CachedKey::Cached(ref key) = *self.slot.read().await {
            return Ok(key.clone());
        }

        let id_token = self.identity.id_token().await?;
        let key = self.issuer.fetch_key(&id_token).await?;
        *self.slot.write().await = CachedKey::Cached(key.clone());
        Ok(key)
    }

    /// Empties the slot if it still holds `stale`. A key stored by a
    /// concurrent refresh is left in place.
    pub async fn invalidate(&self, stale: &ScopedSearchKey) -> bool {
        let mut slot = self.slot.write().await;
        match *slot {
            CachedKey::Cached(ref key) if key == stale => {
                *slot = CachedKey::Empty;
                true
            }
            _ => false,
        }
    }
}
