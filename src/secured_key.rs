//! Secured API keys in the Algolia format.
//!
//! A secured key is `base64(hex(hmac_sha256(parent_key, params)) + params)` where
//! `params` is a url-encoded query string of restrictions. The index backend
//! recomputes the HMAC with each parent key it knows and, on a match, applies the
//! restrictions to every query made with the key.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{NoteSearchError, Result};
use crate::types::ScopedSearchKey;

type HmacSha256 = Hmac<Sha256>;

const HMAC_HEX_LEN: usize = 64;

/// Restrictions embedded into a secured key at generation time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecuredKeyParams {
    pub filters: Option<String>,
    pub restrict_indices: Vec<String>,
    pub user_token: Option<String>,
    pub valid_until: Option<i64>,
    pub hits_per_page: Option<usize>,
}

impl SecuredKeyParams {
    /// Url-encodes the restrictions. Field order is fixed so the same
    /// restrictions always produce the same key.
    pub fn to_query_string(&self) -> String {
        let mut ser = url::form_urlencoded::Serializer::new(String::new());
        if let Some(ref filters) = self.filters {
            ser.append_pair("filters", filters);
        }
        if !self.restrict_indices.is_empty() {
            ser.append_pair("restrictIndices", &self.restrict_indices.join(","));
        }
        if let Some(ref token) = self.user_token {
            ser.append_pair("userToken", token);
        }
        if let Some(valid_until) = self.valid_until {
            ser.append_pair("validUntil", &valid_until.to_string());
        }
        if let Some(hpp) = self.hits_per_page {
            ser.append_pair("hitsPerPage", &hpp.to_string());
        }
        ser.finish()
    }
}

/// Restrictions recovered from a validated secured key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecuredKeyRestrictions {
    pub filters: Option<String>,
    pub valid_until: Option<i64>,
    pub restrict_indices: Option<Vec<String>>,
    pub user_token: Option<String>,
    pub hits_per_page: Option<usize>,
}

impl SecuredKeyRestrictions {
    pub fn from_params(params: &str) -> Self {
        let mut restrictions = SecuredKeyRestrictions::default();

        for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
            match key.as_ref() {
                "filters" => restrictions.filters = Some(value.into_owned()),
                "validUntil" => restrictions.valid_until = value.parse().ok(),
                "restrictIndices" => {
                    restrictions.restrict_indices =
                        Some(match serde_json::from_str::<Vec<String>>(&value) {
                            Ok(v) => v,
                            Err(_) => value.split(',').map(|s| s.trim().to_string()).collect(),
                        });
                }
                "userToken" => restrictions.user_token = Some(value.into_owned()),
                "hitsPerPage" => restrictions.hits_per_page = value.parse().ok(),
                _ => {}
            }
        }

        restrictions
    }

    pub fn is_expired_at(&self, now_unix_secs: i64) -> bool {
        self.valid_until.is_some_and(|until| now_unix_secs > until)
    }

    pub fn allows_index(&self, index_name: &str) -> bool {
        match self.restrict_indices {
            Some(ref patterns) => index_pattern_matches(patterns, index_name),
            None => true,
        }
    }
}

/// Derives a secured key from `parent_key` and encoded `params`.
pub fn generate_secured_api_key(parent_key: &str, params: &str) -> Result<ScopedSearchKey> {
    if parent_key.is_empty() {
        return Err(NoteSearchError::Config(
            "parent key for secured key generation is empty".to_string(),
        ));
    }
    let mut mac = HmacSha256::new_from_slice(parent_key.as_bytes())
        .map_err(|e| NoteSearchError::Config(format!("invalid parent key: {}", e)))?;
    mac.update(params.as_bytes());
    let hmac_hex = hex::encode(mac.finalize().into_bytes());
    let combined = format!("{}{}", hmac_hex, params);
    Ok(ScopedSearchKey::new(BASE64.encode(combined.as_bytes())))
}

/// Splits a secured key into its HMAC bytes and params string.
fn split_secured_key(encoded: &str) -> Option<(Vec<u8>, String)> {
    let decoded = BASE64.decode(encoded.as_bytes()).ok()?;
    let decoded_str = String::from_utf8(decoded).ok()?;

    if decoded_str.len() < HMAC_HEX_LEN || !decoded_str.is_char_boundary(HMAC_HEX_LEN) {
        return None;
    }

    let hmac_bytes = hex::decode(&decoded_str[..HMAC_HEX_LEN]).ok()?;
    Some((hmac_bytes, decoded_str[HMAC_HEX_LEN..].to_string()))
}

/// Validates `encoded` against each candidate parent key and returns the
/// restrictions of the first match. Expired keys are rejected.
pub fn validate_secured_key<'a>(
    encoded: &str,
    parent_keys: impl IntoIterator<Item = &'a str>,
    now_unix_secs: i64,
) -> Option<SecuredKeyRestrictions> {
    let (hmac_bytes, params) = split_secured_key(encoded)?;

    for parent in parent_keys {
        if parent.is_empty() {
            continue;
        }
        let Ok(mut mac) = HmacSha256::new_from_slice(parent.as_bytes()) else {
            continue;
        };
        mac.update(params.as_bytes());
        if mac.verify_slice(&hmac_bytes).is_ok() {
            let restrictions = SecuredKeyRestrictions::from_params(&params);
            if restrictions.is_expired_at(now_unix_secs) {
                return None;
            }
            return Some(restrictions);
        }
    }
    None
}

/// Compares two secrets without short-circuiting on the first differing
/// byte. An empty expected value never matches.
pub fn constant_time_eq(presented: &str, expected: &str) -> bool {
    if presented.len() != expected.len() || expected.is_empty() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in presented.bytes().zip(expected.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Matches an index name against patterns with optional leading/trailing `*`.
pub fn index_pattern_matches(patterns: &[String], index_name: &str) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            true
        } else if pattern.starts_with('*') && pattern.ends_with('*') {
            index_name.contains(&pattern[1..pattern.len() - 1])
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            index_name.ends_with(suffix)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            index_name.starts_with(prefix)
        } else {
            pattern == index_name
        }
    })
}
