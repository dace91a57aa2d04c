use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum NoteSearchError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index upsert failed for {object_id}: {message}")]
    SyncUpsert {
        object_id: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Search query failed: {message}")]
    SearchQuery {
        status: Option<u16>,
        message: String,
    },

    #[error("Search key issuance failed: {0}")]
    KeyIssuance(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Index not allowed: {0}")]
    IndexNotAllowed(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, NoteSearchError>;

impl From<serde_json::Error> for NoteSearchError {
    fn from(e: serde_json::Error) -> Self {
        NoteSearchError::Json(e.to_string())
    }
}

impl NoteSearchError {
    pub fn invalid_credential(detail: impl Into<String>) -> Self {
        NoteSearchError::InvalidCredential(detail.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            NoteSearchError::MissingCredential => StatusCode::FORBIDDEN,
            NoteSearchError::InvalidCredential(_) => StatusCode::FORBIDDEN,
            NoteSearchError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            NoteSearchError::SyncUpsert { .. } => StatusCode::SERVICE_UNAVAILABLE,
            NoteSearchError::SearchQuery { .. } => StatusCode::BAD_GATEWAY,
            NoteSearchError::KeyIssuance(_) => StatusCode::BAD_GATEWAY,
            NoteSearchError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            NoteSearchError::InvalidFilter(_) => StatusCode::BAD_REQUEST,
            NoteSearchError::IndexNotAllowed(_) => StatusCode::FORBIDDEN,
            NoteSearchError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            NoteSearchError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Whether the hosting runtime should re-invoke the operation that failed.
    pub fn is_transient(&self) -> bool {
        matches!(self, NoteSearchError::SyncUpsert { .. })
    }

    /// Credential failures are indistinguishable to the caller.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            NoteSearchError::MissingCredential | NoteSearchError::InvalidCredential(_)
        )
    }
}


// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for NoteSearchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_code, message) = match &self {
            // Credential failures never reveal which check failed.
            NoteSearchError::MissingCredential | NoteSearchError::InvalidCredential(_) => {
                let body = serde_json::json!({ "message": "Unauthorized", "status": 403 });
                return (StatusCode::FORBIDDEN, Json(body)).into_response();
            }
            NoteSearchError::Config(_) => (
                "config_error",
                "Search is not configured on this server".to_string(),
            ),
            NoteSearchError::SyncUpsert { object_id, .. } => (
                "sync_failed",
                format!("Index upsert failed for {}", object_id),
            ),
            NoteSearchError::SearchQuery { message, .. } => ("search_failed", message.clone()),
            NoteSearchError::KeyIssuance(msg) => ("key_issuance_failed", msg.clone()),
            NoteSearchError::InvalidDocument(msg) => ("invalid_document", msg.clone()),
            NoteSearchError::InvalidFilter(msg) => ("invalid_filter", msg.clone()),
            NoteSearchError::IndexNotAllowed(_) => (
                "index_not_allowed",
                "Invalid Application-ID or API key".to_string(),
            ),
            NoteSearchError::ObjectNotFound(id) => {
                ("object_not_found", format!("ObjectID {} does not exist", id))
            }
            NoteSearchError::Json(msg) => ("json_error", format!("JSON error: {}", msg)),
        };

        let error_response = ErrorResponse {
            error: error_code.to_string(),
            message,
            request_id: format!("req_ns_{}", uuid::Uuid::new_v4()),
        };

        let mut response = (status, Json(error_response)).into_response();
        if matches!(&self, NoteSearchError::SyncUpsert { .. }) {
            response
                .headers_mut()
                .insert("Retry-After", http::HeaderValue::from_static("1"));
        }
        response
    }
}
