use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, Opts, register_histogram_vec,
    register_int_counter_vec,
};

/// Per-controller reconcile instrumentation, registered on the default
/// prometheus registry and rendered by the metrics server.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub phase_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        let reconcile_counter = register_int_counter_vec!(
            Opts::new(
                format!("ambient_{controller}_reconciles_total"),
                "Total reconciles per resource",
            ),
            &["name", "namespace"],
        )
        .expect("register reconcile counter");
        let action_counter = register_int_counter_vec!(
            Opts::new(
                format!("ambient_{controller}_actions_total"),
                "Actions taken per resource",
            ),
            &["name", "namespace", "action"],
        )
        .expect("register action counter");
        let phase_counter = register_int_counter_vec!(
            Opts::new(
                format!("ambient_{controller}_phase_transitions_total"),
                "Phase transitions written by the controller",
            ),
            &["namespace", "phase"],
        )
        .expect("register phase counter");
        let read_histogram = register_histogram_vec!(
            HistogramOpts::new(
                format!("ambient_{controller}_read_seconds"),
                "Duration of the reconcile read phase",
            ),
            &["name", "namespace", "action"],
        )
        .expect("register read histogram");
        let write_histogram = register_histogram_vec!(
            HistogramOpts::new(
                format!("ambient_{controller}_write_seconds"),
                "Duration of the reconcile write phase",
            ),
            &["name", "namespace", "action"],
        )
        .expect("register write histogram");
        Self {
            reconcile_counter,
            action_counter,
            phase_counter,
            read_histogram,
            write_histogram,
        }
    }
}

/// Serves the default prometheus registry plus liveness/readiness
/// probes, the way the platform's other services expose theirs.
pub async fn run_metrics_server(port: u16, cancel: tokio_util::sync::CancellationToken) {
    use axum::{Router, routing::get};

    async fn render() -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", get(render));
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics server");
            return;
        }
    };
    tracing::info!(%addr, "starting operator metrics server");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "metrics server failed");
    }
}
