//! Bearer credential extraction. The token is opaque to us; it is
//! forwarded to the cluster, which owns verification.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};

use crate::{error::ApiError, headers};

/// The caller's bearer token, from `Authorization: Bearer` or the
/// forwarded-access-token synonym set by auth proxies.
pub struct Bearer(pub String);

pub fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION)
        && let Ok(value) = value.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    if let Some(value) = headers.get(headers::FORWARDED_ACCESS_TOKEN)
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return Some(value.trim().to_string());
    }
    None
}

impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        bearer_from_headers(&parts.headers)
            .map(Bearer)
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer credential".to_string()))
    }
}

/// Opaque per-caller identifier for logs and cache keys. Never log the
/// token itself.
pub fn caller_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn extracts_authorization_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_from_headers(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn falls_back_to_forwarded_access_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            headers::FORWARDED_ACCESS_TOKEN,
            HeaderValue::from_static("xyz789"),
        );
        assert_eq!(bearer_from_headers(&headers), Some("xyz789".to_string()));
    }

    #[test]
    fn rejects_empty_and_malformed_values() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(bearer_from_headers(&headers), None);
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_from_headers(&headers), None);
    }

    #[test]
    fn caller_hash_is_stable_and_short() {
        assert_eq!(caller_hash("token"), caller_hash("token"));
        assert_ne!(caller_hash("token"), caller_hash("other"));
        assert_eq!(caller_hash("token").len(), 12);
    }
}
