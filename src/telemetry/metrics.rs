//! Prometheus metrics setup and metric definitions

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    // Seconds; sub-millisecond buckets for calls rejected by the pipeline
    let buckets = [
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    let handle = PrometheusBuilder::new()
        .set_buckets(&buckets)?
        .install_recorder()?;
    Ok(handle)
}

/// Register metric descriptions and emit initial zero values so Prometheus output
/// includes HELP/TYPE lines for all metrics from startup.
pub fn describe_metrics() {
    // HTTP metrics
    describe_counter!("taskgate_http_requests_total", "Total number of HTTP requests");
    describe_histogram!(
        "taskgate_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "taskgate_http_requests_in_flight",
        "Number of HTTP requests currently being processed"
    );

    // Admission pipeline
    describe_counter!(
        "taskgate_rate_limit_throttled_total",
        "Calls refused by a rate limiter"
    );
    describe_counter!(
        "taskgate_auth_rejections_total",
        "Calls refused for a missing or invalid token"
    );
    describe_counter!(
        "taskgate_access_denied_total",
        "Mutations refused by the ownership rule"
    );

    // Services
    describe_counter!("taskgate_auth_login_total", "Login attempts by result");
    describe_counter!(
        "taskgate_proxy_requests_total",
        "Gateway calls relayed to a backend"
    );

    // Counters gated behind specific code paths need an explicit zero
    counter!("taskgate_rate_limit_throttled_total", "limiter" => "inbound").absolute(0);
    counter!("taskgate_auth_rejections_total", "reason" => "missing").absolute(0);
    counter!("taskgate_access_denied_total", "operation" => "update").absolute(0);
    counter!("taskgate_auth_login_total", "result" => "success").absolute(0);
}
