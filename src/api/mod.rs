//! HTTP surface: a single webhook route per project name

use axum::{Router, routing};

pub mod webhook;

pub use webhook::{
    MAX_BODY_SIZE, Rejection, WebhookRequest, dispatch, handle_webhook, validate,
};

use crate::SharedState;

/// Route of the webhook endpoint, `/{name}` or `/<base_url>/{name}`.
pub fn webhook_route(base_url: &str) -> String {
    let base = base_url.trim_matches('/');
    if base.is_empty() {
        "/{name}".to_string()
    } else {
        format!("/{}/{{name}}", base)
    }
}

pub fn build_router(state: SharedState, base_url: &str) -> Router {
    Router::new()
        .route(&webhook_route(base_url), routing::post(handle_webhook))
        .with_state(state)
}
