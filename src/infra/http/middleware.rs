//! Request id propagation and one log line per response.

use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::PageOutcome;
use crate::application::error::ErrorReport;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// The optimizer's part of a response log line.
#[derive(Debug, PartialEq, Eq)]
struct PageSummary {
    page: &'static str,
    passes: String,
}

impl PageSummary {
    fn of(outcome: Option<&PageOutcome>) -> Self {
        let (page, passes) = match outcome {
            None => ("untracked", String::new()),
            Some(PageOutcome::Passed { reason }) => (*reason, String::new()),
            Some(PageOutcome::Amp) => ("amp", String::new()),
            Some(PageOutcome::Optimized { applied }) => (
                "optimized",
                applied
                    .iter()
                    .map(|pass| pass.key())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        };
        Self { page, passes }
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();

    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "pagewright::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request failed",
            );
        } else {
            warn!(
                target = "pagewright::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "client request error",
            );
        }
        return response;
    }

    let outcome = response.extensions().get::<PageOutcome>();
    let optimized = matches!(outcome, Some(PageOutcome::Optimized { .. }));
    let summary = PageSummary::of(outcome);
    if optimized {
        info!(
            target = "pagewright::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            passes = %summary.passes,
            request_id = request_id,
            "page optimized",
        );
    } else {
        debug!(
            target = "pagewright::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms = elapsed_ms,
            page = summary.page,
            request_id = request_id,
            "request completed",
        );
    }

    response
}
