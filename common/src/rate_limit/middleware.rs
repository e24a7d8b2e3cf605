use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{
    Json,
    body::Body,
    http::{Request, Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use tower::{Layer, Service};

use crate::{auth, get_source_ip, rate_limit::RateLimiter};

/// A Tower layer that rate-limits per caller.
///
/// Key selection:
/// - Authenticated requests key on an opaque hash of the bearer token,
///   so one noisy user cannot starve the rest of their workspace.
/// - Unauthenticated requests fall back to the source IP.
/// - With neither, a shared anonymous bucket bounds probe traffic.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: RateLimiter,
}

pub(crate) fn limit_key(headers: &axum::http::HeaderMap) -> String {
    if let Some(token) = auth::bearer_from_headers(headers) {
        return format!("caller:{}", auth::caller_hash(&token));
    }
    if let Some(ip) = get_source_ip(headers) {
        return format!("ip:{ip}");
    }
    "anonymous".to_string()
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key = limit_key(req.headers());
            if !limiter.check(&key) {
                return Ok((
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({"reason": "rate limit exceeded"})),
                )
                    .into_response());
            }
            inner.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header::AUTHORIZATION};

    #[test]
    fn keys_prefer_bearer_over_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.10"));
        assert_eq!(limit_key(&headers), "ip:203.0.113.10");
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert!(limit_key(&headers).starts_with("caller:"));
    }

    #[test]
    fn anonymous_without_any_identity() {
        assert_eq!(limit_key(&HeaderMap::new()), "anonymous");
    }
}
