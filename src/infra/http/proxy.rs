//! Reverse proxy to the origin site.

use std::time::{Duration, Instant};

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, HeaderName, Request, StatusCode, header},
    response::{IntoResponse, Response},
};
use metrics::histogram;
use reqwest::{Client, redirect::Policy};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::{application::error::HttpError, infra::error::InfraError};

const SOURCE: &str = "infra::http::proxy";

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to read request body")]
    RequestBody(#[source] axum::Error),
    #[error("failed to build upstream url for `{path}`")]
    Target { path: String },
    #[error("upstream request timed out")]
    Timeout(#[source] reqwest::Error),
    #[error("upstream request failed")]
    Upstream(#[source] reqwest::Error),
}

impl From<ProxyError> for HttpError {
    fn from(error: ProxyError) -> Self {
        let (status, message) = match &error {
            ProxyError::RequestBody(_) => (StatusCode::PAYLOAD_TOO_LARGE, "Request body rejected"),
            ProxyError::Target { .. } => (StatusCode::BAD_REQUEST, "Invalid request path"),
            ProxyError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "Origin timed out"),
            ProxyError::Upstream(_) => (StatusCode::BAD_GATEWAY, "Origin unavailable"),
        };
        HttpError::from_error(SOURCE, status, message, &error)
    }
}

/// Origin client plus the base URL every request is forwarded to.
///
/// Request bodies are buffered up to `max_request_bytes`; origin responses are
/// streamed back.
#[derive(Clone)]
pub struct ProxyState {
    client: Client,
    upstream: Url,
    max_request_bytes: usize,
}

impl ProxyState {
    pub fn new(upstream: Url, timeout: Duration, max_request_bytes: usize) -> Result<Self, InfraError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::upstream(err.to_string()))?;

        Ok(Self {
            client,
            upstream,
            max_request_bytes,
        })
    }

    fn target(&self, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
        if !path.starts_with('/') {
            return Err(ProxyError::Target {
                path: path.to_string(),
            });
        }

        let base = self.upstream.path().trim_end_matches('/');
        let mut target = self.upstream.clone();
        target.set_path(&format!("{base}{path}"));
        target.set_query(query);
        Ok(target)
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let target = self.target(parts.uri.path(), parts.uri.query())?;
        let body = to_bytes(body, self.max_request_bytes)
            .await
            .map_err(ProxyError::RequestBody)?;

        let mut headers = forwardable(&parts.headers);
        // Pages must come back uncompressed to be rewritten.
        headers.remove(header::ACCEPT_ENCODING);
        headers.remove(header::HOST);
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), host.clone());
        }

        let started = Instant::now();
        let upstream = self
            .client
            .request(parts.method, target.clone())
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = upstream.status();
        let headers = forwardable(upstream.headers());
        histogram!("pagewright_upstream_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            target = "pagewright::http::proxy",
            url = %target,
            status = status.as_u16(),
            content_length = upstream.content_length(),
            "origin responded"
        );

        // Streamed; only captured pages are buffered, under their own limit.
        let body = Body::from_stream(upstream.bytes_stream());
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn classify(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::Timeout(err)
    } else {
        ProxyError::Upstream(err)
    }
}

fn forwardable(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

/// Fallback handler forwarding everything not served locally to the origin.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_to_origin(State(proxy): State<ProxyState>, request: Request<Body>) -> Response {
    match proxy.forward(request).await {
        Ok(response) => response,
        Err(err) => HttpError::from(err).into_response(),
    }
}
