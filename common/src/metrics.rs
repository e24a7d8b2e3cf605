use axum::extract::MatchedPath;
use http::Request;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tower::{Layer, Service};

use futures_util::future::BoxFuture;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the recorder exactly once process-wide and returns the
/// render handle for a `/metrics` route.
pub fn prometheus_handle() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Tower layer that records request count, latency histogram, and
/// in-flight gauge. Uses `MatchedPath` to avoid high-cardinality raw
/// URLs.
#[derive(Clone)]
pub struct MetricsLayer {
    service: &'static str,
}

impl MetricsLayer {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            service: self.service,
        }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    service: &'static str,
}

impl<S, B> Service<Request<B>> for MetricsService<S>
where
    S: Service<Request<B>, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let start = Instant::now();
        let method = req.method().as_str().to_owned();

        // Extract the route template here to avoid capturing non-Send
        // request parts in the async block.
        let route: String = req
            .extensions()
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_owned())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let mut svc = self.inner.clone();
        let fut = svc.call(req);
        let service = self.service;

        Box::pin(async move {
            let in_flight =
                gauge!("http_server_in_flight_requests", "service" => service, "method" => method.clone());
            in_flight.increment(1);

            let res = fut.await;
            let elapsed = start.elapsed().as_secs_f64();

            let status = match &res {
                Ok(resp) => resp.status().as_u16().to_string(),
                Err(_) => "500".to_string(),
            };

            histogram!(
                "http_server_request_duration_seconds",
                "service" => service,
                "method" => method.clone(),
                "route"  => route.clone(),
                "status" => status.clone(),
            )
            .record(elapsed);

            counter!(
                "http_server_requests_total",
                "service" => service,
                "method" => method,
                "route"  => route,
                "status" => status,
            )
            .increment(1);

            in_flight.decrement(1);

            res
        })
    }
}
