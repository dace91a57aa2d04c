//! Bearer ID-token verification.
//!
//! Tokens are identity-provider ID tokens (JWT). In production they are RS256
//! and verified against the provider's JWKS, which is cached and swapped
//! wholesale on refresh. For local development a shared HS256 secret can be
//! used instead.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use notesearch::error::{NoteSearchError, Result};
use notesearch::types::SubjectId;

/// Public signing keys for the provider's ID tokens.
pub const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(3600);
/// A kid missing from a key set younger than this is rejected without refetching.
const JWKS_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(30);
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Claims of a provider ID token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    /// Provider uid; equals `sub` on well-formed tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl IdTokenClaims {
    pub fn subject_id(&self) -> Result<SubjectId> {
        let uid = self
            .user_id
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&self.sub);
        SubjectId::new(uid)
    }
}

/// Identity attached to a request after verification.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub subject: SubjectId,
    pub claims: IdTokenClaims,
}

struct CachedJwks {
    fetched_at: Instant,
    keys: Arc<HashMap<String, DecodingKey>>,
}

impl CachedJwks {
    fn lookup(&self, kid: &str) -> Option<Result<DecodingKey>> {
        let age = self.fetched_at.elapsed();
        if age >= JWKS_REFRESH_INTERVAL {
            return None;
        }
        match self.keys.get(kid) {
            Some(key) => Some(Ok(key.clone())),
            None if age < JWKS_MIN_REFETCH_INTERVAL => Some(Err(unknown_kid(kid))),
            None => None,
        }
    }
}

fn unknown_kid(kid: &str) -> NoteSearchError {
    NoteSearchError::invalid_credential(format!("unknown kid {}", kid))
}

enum KeySource {
    Jwks {
        url: String,
        http_client: reqwest::Client,
        cache: RwLock<Option<CachedJwks>>,
    },
    SharedSecret(DecodingKey),
}

pub struct IdentityVerifier {
    project_id: Option<String>,
    source: KeySource,
}

impl IdentityVerifier {
    /// RS256 verification against the JWKS at `jwks_url`.
    pub fn jwks(project_id: impl Into<String>, jwks_url: impl Into<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        IdentityVerifier {
            project_id: Some(project_id.into()),
            source: KeySource::Jwks {
                url: jwks_url.into(),
                http_client,
                cache: RwLock::new(None),
            },
        }
    }

    /// HS256 verification with a shared secret. Audience and issuer are
    /// checked only when `project_id` is given.
    pub fn shared_secret(project_id: Option<String>, secret: &[u8]) -> Self {
        IdentityVerifier {
            project_id,
            source: KeySource::SharedSecret(DecodingKey::from_secret(secret)),
        }
    }

    fn algorithm(&self) -> Algorithm {
        match self.source {
            KeySource::Jwks { .. } => Algorithm::RS256,
            KeySource::SharedSecret(_) => Algorithm::HS256,
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm());
        validation.validate_exp = true;
        match self.project_id {
            Some(ref project) => {
                validation.set_audience(&[project.as_str()]);
                validation.set_issuer(&[expected_issuer(project)]);
                validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);
            }
            None => {
                validation.validate_aud = false;
                validation.set_required_spec_claims(&["exp", "sub"]);
            }
        }
        validation
    }

    /// Verifies the raw `Authorization` header value.
    pub async fn verify_header(&self, authorization: Option<&str>) -> Result<VerifiedIdentity> {
        let token = bearer_token(authorization)?;
        self.verify(token).await
    }

    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity> {
        let header = decode_header(token)
            .map_err(|e| NoteSearchError::invalid_credential(format!("malformed token: {}", e)))?;
        if header.alg != self.algorithm() {
            return Err(NoteSearchError::invalid_credential(format!(
                "unexpected signing algorithm {:?}",
                header.alg
            )));
        }

        let key = match self.source {
            KeySource::SharedSecret(ref key) => key.clone(),
            KeySource::Jwks { .. } => {
                let kid = header
                    .kid
                    .ok_or_else(|| NoteSearchError::invalid_credential("token has no kid"))?;
                self.signing_key(&kid).await?
            }
        };

        let data = decode::<IdTokenClaims>(token, &key, &self.validation())
            .map_err(|e| NoteSearchError::invalid_credential(e.to_string()))?;
        let subject = data.claims.subject_id()?;

        Ok(VerifiedIdentity {
            subject,
            claims: data.claims,
        })
    }

    async fn signing_key(&self, kid: &str) -> Result<DecodingKey> {
        let KeySource::Jwks {
            ref url,
            ref http_client,
            ref cache,
        } = self.source
        else {
            return Err(NoteSearchError::invalid_credential("no key set configured"));
        };

        if let Some(found) = cache.read().await.as_ref().and_then(|c| c.lookup(kid)) {
            return found;
        }

        let mut guard = cache.write().await;
        // Another request may have refreshed while this one waited.
        if let Some(found) = guard.as_ref().and_then(|c| c.lookup(kid)) {
            return found;
        }

        let keys = fetch_jwks(http_client, url).await?;
        let found = keys.get(kid).cloned();
        *guard = Some(CachedJwks {
            fetched_at: Instant::now(),
            keys: Arc::new(keys),
        });

        found.ok_or_else(|| unknown_kid(kid))
    }
}

pub fn expected_issuer(project_id: &str) -> String {
    format!("https://securetoken.google.com/{}", project_id)
}

/// Extracts the token from `Bearer <token>`.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str> {
    authorization
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(NoteSearchError::MissingCredential)
}

async fn fetch_jwks(
    http_client: &reqwest::Client,
    url: &str,
) -> Result<HashMap<String, DecodingKey>> {
    let fetch_failed = |detail: String| {
        tracing::error!(url = %url, "Failed to fetch identity provider keys: {}", detail);
        NoteSearchError::invalid_credential("signing keys unavailable")
    };

    let response = http_client
        .get(url)
        .send()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fetch_failed(format!("status {}", response.status())));
    }
    let set: JwkSet = response
        .json()
        .await
        .map_err(|e| fetch_failed(e.to_string()))?;

    let mut keys = HashMap::new();
    for jwk in &set.keys {
        let Some(ref kid) = jwk.common.key_id else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid.clone(), key);
            }
            Err(e) => tracing::warn!(kid = %kid, "Skipping unusable JWK: {}", e),
        }
    }
    tracing::info!(count = keys.len(), "Refreshed identity provider signing keys");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROJECT: &str = "notes-demo";
    const RSA_PEM: &str = include_str!("../testdata/rsa_private.pem");
    const JWKS: &str = include_str!("../testdata/jwks.json");

    fn claims(uid: &str, exp_offset: i64) -> IdTokenClaims {
        let now = chrono::Utc::now().timestamp();
        IdTokenClaims {
            sub: uid.to_string(),
            user_id: Some(uid.to_string()),
            exp: now + exp_offset,
            iat: Some(now - 10),
            aud: Some(PROJECT.to_string()),
            iss: Some(expected_issuer(PROJECT)),
            email: None,
        }
    }

    fn rs256_token(claims: &IdTokenClaims, kid: &str) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        encode(
            &header,
            claims,
            &EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    fn hs256_token(claims: &IdTokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    async fn jwks_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(matches!(
            bearer_token(None).unwrap_err(),
            NoteSearchError::MissingCredential
        ));
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(Some("bearer abc")).is_err());
    }

    #[test]
    fn subject_prefers_user_id() {
        let mut c = claims("u1", 60);
        c.sub = "other".into();
        assert_eq!(c.subject_id().unwrap().as_str(), "u1");
        c.user_id = None;
        assert_eq!(c.subject_id().unwrap().as_str(), "other");
    }

    #[tokio::test]
    async fn shared_secret_accepts_valid_token() {
        let verifier = IdentityVerifier::shared_secret(Some(PROJECT.into()), b"dev-secret");
        let token = hs256_token(&claims("u1", 300), "dev-secret");
        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.subject.as_str(), "u1");
    }

    #[tokio::test]
    async fn shared_secret_rejects_wrong_secret_and_expired() {
        let verifier = IdentityVerifier::shared_secret(Some(PROJECT.into()), b"dev-secret");

        let forged = hs256_token(&claims("u1", 300), "other-secret");
        assert!(verifier.verify(&forged).await.unwrap_err().is_unauthorized());

        let expired = hs256_token(&claims("u1", -3600), "dev-secret");
        assert!(verifier.verify(&expired).await.unwrap_err().is_unauthorized());
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let verifier = IdentityVerifier::shared_secret(Some(PROJECT.into()), b"dev-secret");
        let mut c = claims("u1", 300);
        c.aud = Some("someone-else".into());
        let token = hs256_token(&c, "dev-secret");
        assert!(verifier.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn garbage_token_is_invalid_credential() {
        let verifier = IdentityVerifier::shared_secret(None, b"dev-secret");
        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert!(matches!(err, NoteSearchError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn jwks_verifies_rs256_token() {
        let server = jwks_server().await;
        let verifier = IdentityVerifier::jwks(PROJECT, format!("{}/jwks", server.uri()));
        let token = rs256_token(&claims("u1", 300), "test-key-1");

        let identity = verifier
            .verify_header(Some(&format!("Bearer {}", token)))
            .await
            .unwrap();
        assert_eq!(identity.subject.as_str(), "u1");
        assert_eq!(identity.claims.aud.as_deref(), Some(PROJECT));
    }

    #[tokio::test]
    async fn jwks_is_cached_between_verifications() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = IdentityVerifier::jwks(PROJECT, format!("{}/jwks", server.uri()));
        let token = rs256_token(&claims("u1", 300), "test-key-1");
        verifier.verify(&token).await.unwrap();
        verifier.verify(&token).await.unwrap();
    }

    #[tokio::test]
    async fn jwks_rejects_unknown_kid_and_hs256() {
        let server = jwks_server().await;
        let verifier = IdentityVerifier::jwks(PROJECT, format!("{}/jwks", server.uri()));

        let unknown = rs256_token(&claims("u1", 300), "rotated-away");
        assert!(verifier.verify(&unknown).await.unwrap_err().is_unauthorized());

        let downgraded = hs256_token(&claims("u1", 300), "anything");
        assert!(verifier.verify(&downgraded).await.unwrap_err().is_unauthorized());
    }

    #[tokio::test]
    async fn unknown_kids_do_not_refetch_fresh_jwks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let verifier = IdentityVerifier::jwks(PROJECT, format!("{}/jwks", server.uri()));
        for kid in ["rotated-away", "made-up-kid", "rotated-away"] {
            let token = rs256_token(&claims("u1", 300), kid);
            assert!(verifier.verify(&token).await.unwrap_err().is_unauthorized());
        }

        let valid = rs256_token(&claims("u1", 300), "test-key-1");
        assert_eq!(verifier.verify(&valid).await.unwrap().subject.as_str(), "u1");
    }

    #[tokio::test]
    async fn unreachable_jwks_is_unauthorized() {
        let verifier = IdentityVerifier::jwks(PROJECT, "http://127.0.0.1:9/jwks");
        let token = rs256_token(&claims("u1", 300), "test-key-1");
        assert!(verifier.verify(&token).await.unwrap_err().is_unauthorized());
    }
}
