mod auth;
mod capture;
mod middleware;
mod proxy;

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};

pub use auth::{SessionCookieAuth, VisitorAuth};
pub use capture::{CapturedPage, OptimizerState, PageOutcome, optimize_responses};
pub use middleware::{RequestContext, log_responses, set_request_context};
pub use proxy::{ProxyError, ProxyState, proxy_to_origin};

use super::assets::{FsAssetStore, serve_bundle};

#[derive(Clone)]
pub struct HttpState {
    pub optimizer: OptimizerState,
    pub proxy: ProxyState,
    pub bundles: Arc<FsAssetStore>,
}

impl FromRef<HttpState> for OptimizerState {
    fn from_ref(state: &HttpState) -> Self {
        state.optimizer.clone()
    }
}

impl FromRef<HttpState> for ProxyState {
    fn from_ref(state: &HttpState) -> Self {
        state.proxy.clone()
    }
}

impl FromRef<HttpState> for Arc<FsAssetStore> {
    fn from_ref(state: &HttpState) -> Self {
        state.bundles.clone()
    }
}

/// Combined bundles are served locally; everything else goes to the origin
/// and through the optimizer on the way back.
pub fn build_router(state: HttpState) -> Router {
    let bundle_route = format!("{}/{{file}}", state.bundles.public_prefix());

    let pages = Router::new()
        .fallback(proxy_to_origin)
        .layer(from_fn_with_state(state.optimizer.clone(), optimize_responses));

    Router::new()
        .route(&bundle_route, get(serve_bundle))
        .merge(pages)
        .with_state(state)
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}
