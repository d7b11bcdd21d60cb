//! Gateway relay handler

use crate::error::Result;
use crate::middleware::ClientAddr;
use crate::state::HasUpstreams;
use crate::upstream::ProxiedCall;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, Uri},
    response::Response,
    Extension,
};

/// Relay any call under a backend prefix; other paths are 404
pub async fn forward<S: HasUpstreams>(
    State(state): State<S>,
    Extension(ClientAddr(client_ip)): Extension<ClientAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    state
        .upstream_client()
        .forward(ProxiedCall {
            method,
            path: uri.path(),
            query: uri.query(),
            headers: &headers,
            body,
            client_ip,
        })
        .await
}
