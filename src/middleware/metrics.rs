//! Per-call HTTP telemetry
//!
//! `ObservabilityLayer` wraps a whole service router, outside the admission
//! pipeline, so it also sees the calls the pipeline turns away. Each call gets
//! an `x-request-id` (propagated or minted) and one sample on
//! `taskgate_http_requests_total` labelled with the pipeline's verdict:
//! `admitted`, `rate_limit`, `auth`, or `bypassed` for routes the pipeline
//! does not cover (`/health`, `/metrics`, CORS pre-flight).

use super::pipeline::AdmissionOutcome;
use axum::{
    body::Body,
    http::{HeaderValue, Request},
    response::Response,
};
use metrics::{counter, gauge, histogram};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const IN_FLIGHT: &str = "taskgate_http_requests_in_flight";
const BYPASSED: &str = "bypassed";

#[derive(Clone, Copy, Debug, Default)]
pub struct ObservabilityLayer;

impl<S> Layer<S> for ObservabilityLayer {
    type Service = Observed<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Observed { inner }
    }
}

#[derive(Clone, Debug)]
pub struct Observed<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for Observed<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let record = CallRecord::open(&request);
        let span = tracing::info_span!("request", request_id = record.request_id_str());
        let call = self.inner.call(request);

        Box::pin(
            async move {
                let mut response = call.await?;
                record.close(&mut response);
                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Bookkeeping for one call, from dispatch to response
struct CallRecord {
    method: String,
    route: String,
    request_id: Option<HeaderValue>,
    started: Instant,
    _in_flight: InFlight,
}

impl CallRecord {
    fn open(request: &Request<Body>) -> Self {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .filter(|v| !v.is_empty())
            .cloned()
            .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

        Self {
            method: request.method().as_str().to_string(),
            route: route_label(request.uri().path()),
            request_id,
            started: Instant::now(),
            _in_flight: InFlight::enter(),
        }
    }

    fn request_id_str(&self) -> &str {
        self.request_id
            .as_ref()
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Record the finished call and stamp the request id on its response
    fn close(self, response: &mut Response) {
        let admission = admission_label(response);
        let status = response.status().as_u16().to_string();

        counter!(
            "taskgate_http_requests_total",
            "method" => self.method.clone(),
            "path" => self.route.clone(),
            "status" => status,
            "admission" => admission
        )
        .increment(1);
        histogram!(
            "taskgate_http_request_duration_seconds",
            "method" => self.method,
            "path" => self.route
        )
        .record(self.started.elapsed().as_secs_f64());

        if let Some(id) = self.request_id {
            response.headers_mut().insert(REQUEST_ID_HEADER, id);
        }
    }
}

/// Holds one unit of the in-flight gauge; released on drop, so calls that
/// fail or are cancelled are not left counted
struct InFlight;

impl InFlight {
    fn enter() -> Self {
        gauge!(IN_FLIGHT).increment(1.0);
        InFlight
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT).decrement(1.0);
    }
}

fn admission_label(response: &Response) -> &'static str {
    response
        .extensions()
        .get::<AdmissionOutcome>()
        .map_or(BYPASSED, |outcome| outcome.as_label())
}

/// Path label with id segments replaced by `{id}`, so per-resource paths
/// share one series
fn route_label(path: &str) -> String {
    let mut label = String::with_capacity(path.len());
    for (i, segment) in path.split('/').enumerate() {
        if i > 0 {
            label.push('/');
        }
        label.push_str(match Uuid::parse_str(segment) {
            Ok(_) => "{id}",
            Err(_) => segment,
        });
    }
    label
}
