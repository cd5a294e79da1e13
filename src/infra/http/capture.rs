//! Output interception: buffer optimizable pages and run them through the optimizer.
//!
//! A request moves through idle → capturing → flushed at most once. Signed-in
//! visitors stay idle and never reach the optimizer.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode, header, response::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{debug, instrument};

use super::auth::VisitorAuth;
use crate::{
    application::{error::HttpError, optimizer::Optimizer},
    domain::pass::Pass,
};

const SOURCE: &str = "infra::http::capture";

/// Shared state for [`optimize_responses`].
#[derive(Clone)]
pub struct OptimizerState {
    pub optimizer: Arc<Optimizer>,
    pub auth: Arc<dyn VisitorAuth>,
    pub max_body_bytes: usize,
}

/// What [`optimize_responses`] did with a response. Left in the response
/// extensions for the request log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Emitted untouched; `reason` names the skip.
    Passed { reason: &'static str },
    /// Buffered, but the AMP guard kept every pass away.
    Amp,
    Optimized { applied: Vec<Pass> },
}

/// Why a response left the middleware without being optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Skip {
    Authenticated,
    Head,
    Status,
    NotHtml,
    Encoded,
    Oversized,
    Empty,
    NotUtf8,
}

impl Skip {
    fn as_str(self) -> &'static str {
        match self {
            Skip::Authenticated => "authenticated",
            Skip::Head => "head",
            Skip::Status => "status",
            Skip::NotHtml => "not_html",
            Skip::Encoded => "encoded",
            Skip::Oversized => "oversized",
            Skip::Empty => "empty",
            Skip::NotUtf8 => "not_utf8",
        }
    }

    fn record(self, response: &mut Response) {
        counter!("pagewright_capture_skipped_total", "reason" => self.as_str()).increment(1);
        debug!(
            target = "pagewright::http::capture",
            reason = self.as_str(),
            "response passed through"
        );
        response.extensions_mut().insert(PageOutcome::Passed {
            reason: self.as_str(),
        });
    }
}

/// A page held back from the client until the optimizer has run over it.
pub struct CapturedPage {
    parts: Parts,
    html: String,
}

impl CapturedPage {
    /// Run the optimizer and emit the rewritten response.
    ///
    /// Consumes the capture so a page is flushed exactly once.
    pub async fn flush(self, optimizer: Arc<Optimizer>) -> Result<Response, HttpError> {
        let Self { mut parts, html } = self;

        let optimized = tokio::task::spawn_blocking(move || optimizer.optimize(html))
            .await
            .map_err(|err| {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    &err,
                )
            })??;

        parts.headers.remove(header::CONTENT_LENGTH);
        parts.headers.remove(header::ETAG);
        parts.extensions.insert(if optimized.amp {
            PageOutcome::Amp
        } else {
            PageOutcome::Optimized {
                applied: optimized.applied,
            }
        });

        Ok(Response::from_parts(parts, Body::from(optimized.html)))
    }
}

enum Capture {
    Pass(Response),
    Page(CapturedPage),
}

/// Middleware running every anonymous HTML page through the optimizer.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn optimize_responses(
    State(state): State<OptimizerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.auth.is_authenticated(request.headers()) {
        let mut response = next.run(request).await;
        Skip::Authenticated.record(&mut response);
        return response;
    }

    let is_head = request.method() == Method::HEAD;
    let response = next.run(request).await;

    let captured = match capture(response, is_head, state.max_body_bytes).await {
        Ok(captured) => captured,
        Err(err) => return err.into_response(),
    };

    match captured {
        Capture::Pass(response) => response,
        Capture::Page(page) => match page.flush(state.optimizer.clone()).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        },
    }
}

async fn capture(
    mut response: Response,
    is_head: bool,
    limit: usize,
) -> Result<Capture, HttpError> {
    if let Some(skip) = skip_reason(&response, is_head, limit) {
        skip.record(&mut response);
        return Ok(Capture::Pass(response));
    }

    let (parts, body) = response.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(|err| {
        HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            format!("failed to buffer page body: {err}"),
        )
    })?;

    if bytes.is_empty() {
        let mut response = Response::from_parts(parts, Body::empty());
        Skip::Empty.record(&mut response);
        return Ok(Capture::Pass(response));
    }

    match String::from_utf8(Vec::from(bytes)) {
        Ok(html) => Ok(Capture::Page(CapturedPage { parts, html })),
        Err(err) => {
            let mut response = Response::from_parts(parts, Body::from(err.into_bytes()));
            Skip::NotUtf8.record(&mut response);
            Ok(Capture::Pass(response))
        }
    }
}

fn skip_reason(response: &Response, is_head: bool, limit: usize) -> Option<Skip> {
    if is_head {
        return Some(Skip::Head);
    }
    if response.status() != StatusCode::OK {
        return Some(Skip::Status);
    }

    let headers = response.headers();
    if !is_html(headers) {
        return Some(Skip::NotHtml);
    }
    if headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.trim().eq_ignore_ascii_case("identity"))
    {
        return Some(Skip::Encoded);
    }
    if declared_length(headers).is_some_and(|length| length > limit as u64) {
        return Some(Skip::Oversized);
    }

    None
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}
