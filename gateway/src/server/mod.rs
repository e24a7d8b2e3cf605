//! Router and shared state for the gateway. Every authenticated route
//! follows the same shape: extract the bearer token, run the access
//! review for the route's verb, then act with a client bound to the
//! caller's own credential.

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use kube::Client;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use ambient_common::{
    access::AccessGate,
    access_log,
    clients::ClientFactory,
    error::ApiError,
    metrics::{MetricsLayer, prometheus_handle},
    rate_limit::{RateLimiter, middleware::RateLimitLayer},
};
use ambient_types::UserContext;

use crate::{args::ServerArgs, handlers};

/// API group of the session control plane's custom objects.
pub const GROUP: &str = "ambient-code.io";

#[derive(Clone)]
pub struct AppState {
    /// Per-request clients, bound to the request deadline.
    pub factory: ClientFactory,
    /// Same credentials, longer deadline, for runner side-channel
    /// proxying.
    pub proxy_factory: ClientFactory,
    pub gate: AccessGate,
}

/// Resolves the caller identity the cluster sees for this credential.
/// Used to stamp `userContext` and workspace role bindings; never
/// trusted from the request body.
pub async fn whoami(client: &Client) -> Result<UserContext, ApiError> {
    use k8s_openapi::api::authentication::v1::SelfSubjectReview;
    use kube::{Api, api::PostParams};

    let api: Api<SelfSubjectReview> = Api::all(client.clone());
    let created = api
        .create(&PostParams::default(), &SelfSubjectReview::default())
        .await
        .map_err(ApiError::from)?;
    let info = created
        .status
        .and_then(|s| s.user_info)
        .unwrap_or_default();
    Ok(UserContext {
        user_id: info.username.unwrap_or_default(),
        display_name: None,
        groups: info.groups.unwrap_or_default(),
    })
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let request_timeout = args.http.request_timeout()?;
    let proxy_timeout = args.proxy_timeout()?;

    let base = ClientFactory::infer()
        .await
        .context("failed to load cluster connection settings")?;
    let state = AppState {
        factory: base.clone().with_timeout(request_timeout),
        proxy_factory: base.with_timeout(proxy_timeout),
        gate: AccessGate::new(),
    };

    let cors = ambient_common::cors::layer(&args.cors.cors_allowed_origins)
        .context("invalid CORS configuration")?;
    let limiter = RateLimiter::new(args.rate.clone().into());
    let handle = prometheus_handle().clone();

    let api = Router::new()
        .route("/workspaces", get(handlers::workspaces::list).post(handlers::workspaces::create))
        .route(
            "/workspaces/{workspace}/sessions",
            get(handlers::sessions::list).post(handlers::sessions::create),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}",
            get(handlers::sessions::get_one)
                .put(handlers::sessions::update)
                .delete(handlers::sessions::delete),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}/stop",
            post(handlers::lifecycle::stop),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}/resume",
            post(handlers::lifecycle::resume),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}/clone",
            post(handlers::lifecycle::clone_session),
        )
        .route(
            "/workspaces/{workspace}/sessions/{session}/workspace/file/{*path}",
            get(handlers::files::read).put(handlers::files::write),
        )
        .route(
            "/workspaces/{workspace}/integrations",
            get(handlers::integrations::status),
        );

    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        )
        .nest("/api", api)
        .layer(tower_http::timeout::TimeoutLayer::new(proxy_timeout.max(request_timeout)))
        .layer(cors)
        .layer(RateLimitLayer::new(limiter))
        .layer(MetricsLayer::new("gateway"))
        // Outermost, so limited and timed-out requests are logged too.
        .layer(middleware::from_fn(access_log::middleware))
        .with_state(state);

    let cancel = CancellationToken::new();
    let cancel_signal = cancel.clone();
    tokio::spawn(async move {
        ambient_common::shutdown::shutdown_signal().await;
        cancel_signal.cancel();
    });

    let addr = format!("0.0.0.0:{}", args.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind gateway server")?;
    tracing::info!(%addr, "starting gateway");
    ambient_common::signal_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .context("gateway server failed")?;

    tracing::info!("gateway stopped gracefully");
    Ok(())
}
