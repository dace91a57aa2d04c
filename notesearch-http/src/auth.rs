use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use notesearch::error::NoteSearchError;
use notesearch::index::{IndexAccess, KeyRing};

use crate::identity::IdentityVerifier;

/// Verifies the bearer ID token and attaches the
/// [`VerifiedIdentity`](crate::identity::VerifiedIdentity) to the request.
/// Any failure ends the request with 403 before the handler runs.
pub async fn require_identity(
    State(verifier): State<Arc<IdentityVerifier>>,
    mut request: Request,
    next: Next,
) -> Result<Response, NoteSearchError> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match verifier.verify_header(authorization).await {
        Ok(identity) => {
            tracing::debug!(subject = %identity.subject, "ID token verified");
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request: {}", e);
            Err(e)
        }
    }
}

/// Keys accepted by the local index emulator.
#[derive(Clone)]
pub struct EmulatorAuth {
    pub app_id: String,
    pub keys: KeyRing,
}

fn extract_header_or_param(request: &Request, name: &str) -> Option<String> {
    if let Some(val) = request.headers().get(name) {
        return val.to_str().ok().map(|s| s.to_string());
    }
    request.uri().query().and_then(|query| {
        url_pairs(query)
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn url_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query.split('&').filter_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        Some((k.to_string(), v.to_string()))
    })
}

fn error_json(message: &str, status: u16) -> Response {
    let body = serde_json::json!({ "message": message, "status": status });
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::FORBIDDEN),
        [("content-type", "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Algolia-style key check for the emulator routes: the application id must
/// match and the API key must resolve through the key ring. The resulting
/// [`IndexAccess`] is attached for the handlers to enforce.
pub async fn authenticate_index_request(
    State(auth): State<Arc<EmulatorAuth>>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    if request.method() == Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let app_id = extract_header_or_param(&request, "x-algolia-application-id");
    if app_id.as_deref() != Some(auth.app_id.as_str()) {
        return Err(error_json("Invalid Application-ID or API key", 403));
    }

    let api_key = extract_header_or_param(&request, "x-algolia-api-key").unwrap_or_default();
    let access = match auth.keys.authorize(&api_key) {
        Ok(access) => access,
        Err(_) => return Err(error_json("Invalid Application-ID or API key", 403)),
    };

    let is_write = request.method() == Method::PUT;
    if is_write && !access.can_write() {
        return Err(error_json("Method not allowed with this API key", 403));
    }

    request.extensions_mut().insert(access);
    Ok(next.run(request).await)
}
