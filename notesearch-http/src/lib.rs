pub mod auth;
pub mod handlers;
pub mod identity;
pub mod server;

pub use identity::{IdentityVerifier, VerifiedIdentity};
pub use server::{build_app_state, build_router, serve, Emulator};
