use anyhow::{Context, Result};
use http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderName},
};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

const METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

fn allowed_headers() -> [HeaderName; 3] {
    [
        CONTENT_TYPE,
        AUTHORIZATION,
        HeaderName::from_static(crate::headers::PROJECT),
    ]
}

/// Mirror-anything CORS for local development only.
pub fn dev() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods(METHODS)
        .allow_headers(allowed_headers())
        .max_age(Duration::from_secs(60 * 60))
}

/// Allow-list CORS. Credentialed cross-origin requests are only
/// honored for the configured origins.
pub fn from_origins(origins: &[String]) -> Result<CorsLayer> {
    let parsed = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_credentials(true)
        .allow_methods(METHODS)
        .allow_headers(allowed_headers())
        .max_age(Duration::from_secs(60 * 60)))
}

/// Config-driven layer: an empty allow-list means development mode.
pub fn layer(origins: &[String]) -> Result<CorsLayer> {
    if origins.is_empty() {
        Ok(dev())
    } else {
        from_origins(origins)
    }
}
