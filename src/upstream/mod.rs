//! Gateway upstream client
//!
//! Maps gateway paths onto the backend services and relays calls to them
//! over HTTP. Only end-to-end headers cross the hop.

use crate::config::GatewayConfig;
use crate::error::{AppError, Result};
use crate::middleware::rate_limit::REAL_IP_HEADER;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method},
    response::Response,
};
use reqwest::Client;
use std::{net::IpAddr, time::Duration};

/// Headers that describe a single connection and are never forwarded
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
];

/// A backend reachable under a gateway path prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    /// Metric and log label
    pub name: &'static str,
    /// Gateway prefix stripped before forwarding
    pub prefix: &'static str,
    pub base_url: String,
}

impl Upstream {
    pub fn new(name: &'static str, prefix: &'static str, base_url: impl Into<String>) -> Self {
        Self {
            name,
            prefix,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Remainder of `path` after this prefix, if the prefix owns it
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    fn url(&self, rest: &str, query: Option<&str>) -> String {
        match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("{}{}?{}", self.base_url, rest, q),
            None => format!("{}{}", self.base_url, rest),
        }
    }
}

/// An inbound call to relay
#[derive(Debug)]
pub struct ProxiedCall<'a> {
    pub method: Method,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: Bytes,
    /// Caller address, passed on as `X-Real-IP`
    pub client_ip: Option<IpAddr>,
}

/// HTTP client for the gateway's backends
#[derive(Clone)]
pub struct UpstreamClient {
    http_client: Client,
    upstreams: Vec<Upstream>,
}

impl UpstreamClient {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            upstreams: vec![
                Upstream::new("users", "/user", config.user_service_url.as_str()),
                Upstream::new("tasks", "/tasks", config.task_service_url.as_str()),
            ],
        })
    }

    pub fn upstreams(&self) -> &[Upstream] {
        &self.upstreams
    }

    /// Backend owning `path` and the path to request from it
    pub fn route<'a>(&self, path: &'a str) -> Option<(&Upstream, &'a str)> {
        self.upstreams
            .iter()
            .find_map(|u| u.strip(path).map(|rest| (u, rest)))
    }

    /// Relay a call. `NotFound` when no backend owns the path, `Upstream`
    /// when the backend cannot be reached.
    pub async fn forward(&self, call: ProxiedCall<'_>) -> Result<Response> {
        let (upstream, rest) = self
            .route(call.path)
            .ok_or_else(|| AppError::NotFound("route not found".to_string()))?;
        let url = upstream.url(rest, call.query);

        let outcome = self.send(upstream, &url, call).await;
        metrics::counter!(
            "taskgate_proxy_requests_total",
            "upstream" => upstream.name,
            "outcome" => if outcome.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        outcome
    }

    async fn send(
        &self,
        upstream: &Upstream,
        url: &str,
        call: ProxiedCall<'_>,
    ) -> Result<Response> {
        tracing::debug!(
            upstream = upstream.name,
            method = %call.method,
            url = %url,
            "Forwarding call"
        );

        let response = self
            .http_client
            .request(call.method, url)
            .headers(upstream_headers(call.headers, call.client_ip))
            .body(call.body)
            .send()
            .await
            .map_err(|e| {
                AppError::Upstream(format!("Failed to reach {} service: {}", upstream.name, e))
            })?;

        let status = response.status();
        let headers = end_to_end(response.headers());
        let body = response.bytes().await.map_err(|e| {
            AppError::Upstream(format!("Failed to read {} response: {}", upstream.name, e))
        })?;

        let mut relayed = Response::new(Body::from(body));
        *relayed.status_mut() = status;
        *relayed.headers_mut() = headers;
        Ok(relayed)
    }
}

/// Request headers for the backend. Any caller-supplied `X-Real-IP` is
/// replaced, so backends that trust it only ever see the gateway's value.
fn upstream_headers(inbound: &HeaderMap, client_ip: Option<IpAddr>) -> HeaderMap {
    let mut headers = end_to_end(inbound);
    headers.remove(REAL_IP_HEADER);
    if let Some(ip) = client_ip.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()) {
        headers.insert(REAL_IP_HEADER, ip);
    }
    headers
}

fn end_to_end(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP.iter() {
        forwarded.remove(name);
    }
    forwarded
}
