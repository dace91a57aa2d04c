//! Client side of notesearch: sign in, obtain a scoped search key, cache it,
//! and query the index with one refresh-and-retry on failure.

pub mod cache;
pub mod config;
pub mod identity;
pub mod issuer;
pub mod search;

pub use cache::{CachedKey, ClientKeyCache};
pub use config::ClientConfig;
pub use identity::{IdTokenSource, PasswordSignIn, StaticIdToken};
pub use issuer::{HttpKeyIssuer, KeyIssuer};
pub use search::{AlgoliaSearchBackend, SearchBackend, SearchSession};
