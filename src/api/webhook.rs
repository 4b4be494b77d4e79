//! Webhook handler for GitHub push events
//!
//! A delivery goes through a fixed sequence of checks: project lookup, body
//! read, payload parse, event type, signature, then branch. The first failing
//! check drops the request; only a request passing all of them launches a deploy.

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Path, RawQuery, State as AxumState},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::deploy::Launched;
use crate::extract::{Sources, extract};
use crate::project::Project;
use crate::utils::{first_values, header_values, query_values, verify_hub_signature};
use crate::{AppState, SharedState};

/// GitHub caps webhook payloads at 25MB
pub const MAX_BODY_SIZE: usize = 25 * 1024 * 1024;

const X_GITHUB_EVENT: &str = "x-github-event";
const X_HUB_SIGNATURE: &str = "x-hub-signature";

/// Why a delivery was dropped without deploying
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("Received event for '{0}' but no project found")]
    UnknownProject(String),

    #[error("Received request without an X-GitHub-Event header")]
    MissingEvent,

    #[error("Received request for '{0}' event, skipping and waiting for a 'push' event")]
    IgnoredEvent(String),

    #[error("Received request without an X-Hub-Signature header")]
    MissingSignature,

    #[error("Received request with an invalid X-Hub-Signature")]
    InvalidSignature,

    #[error("Not the branch we're listening for (expected '{expected}', got {found:?})")]
    WrongBranch {
        expected: String,
        found: Option<String>,
    },
}

/// A delivery with its headers, query and payload parsed
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Raw body, the signature covers these exact bytes
    pub body: Bytes,
    /// First value of each header, keyed by lowercase name
    pub headers: Value,
    /// First value of each query parameter
    pub query: Value,
    /// Parsed JSON or form body, `None` for other content types or parse failures
    pub payload: Option<Value>,
}

impl WebhookRequest {
    pub fn parse(headers: &HeaderMap, raw_query: Option<&str>, body: Bytes) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let payload = parse_payload(content_type, &body);

        Self {
            headers: header_values(headers),
            query: query_values(raw_query),
            payload,
            body,
        }
    }

    /// First value of a header, empty values count as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name.to_ascii_lowercase())
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn sources(&self) -> Sources<'_> {
        Sources {
            headers: &self.headers,
            query: &self.query,
            payload: self.payload.as_ref(),
        }
    }
}

/// Parses the body according to the `Content-Type` header. Anything neither
/// JSON nor form encoded leaves the payload empty.
fn parse_payload(content_type: &str, body: &[u8]) -> Option<Value> {
    if content_type.contains("json") {
        match serde_json::from_slice(body) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!("Failed to parse JSON payload: {}", e);
                None
            }
        }
    } else if content_type.contains("form") {
        let pairs = url::form_urlencoded::parse(body);
        Some(Value::Object(first_values(pairs)))
    } else {
        None
    }
}

/// Checks event type, then signature, then branch, stopping at the first failure.
pub fn validate(project: &Project, request: &WebhookRequest) -> Result<(), Rejection> {
    match request.header(X_GITHUB_EVENT) {
        None => return Err(Rejection::MissingEvent),
        Some("push") => {}
        Some(other) => return Err(Rejection::IgnoredEvent(other.to_string())),
    }

    let signature = request
        .header(X_HUB_SIGNATURE)
        .ok_or(Rejection::MissingSignature)?;
    if !verify_hub_signature(&project.secret, &request.body, signature) {
        return Err(Rejection::InvalidSignature);
    }

    let expected = project.branch_ref();
    let found = request
        .payload
        .as_ref()
        .and_then(|payload| extract("ref", payload))
        .and_then(Value::as_str);
    if found != Some(expected.as_str()) {
        return Err(Rejection::WrongBranch {
            found: found.map(str::to_string),
            expected,
        });
    }

    Ok(())
}

/// Runs a delivery for the project `name` through every check and, when all
/// pass, launches its deploy without waiting for it.
pub async fn dispatch(
    state: &AppState,
    name: &str,
    headers: &HeaderMap,
    raw_query: Option<&str>,
    body: Body,
) -> Result<Launched, Rejection> {
    let project = state
        .registry
        .find(name)
        .ok_or_else(|| Rejection::UnknownProject(name.to_string()))?;
    info!("Received event for '{}'", name);

    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            error!("Error reading the request body: {}", e);
            Bytes::new()
        }
    };

    let request = WebhookRequest::parse(headers, raw_query, body);
    validate(&project, &request)?;

    info!("Deployment for '{}' triggered", project.name);
    let args = project.command_arguments(request.sources());
    Ok(state.deployer.spawn(project, args))
}

/// Handles the GitHub webhook POST request.
/// Outcomes only show up in the logs, the response is always 200.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Path(name): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    match dispatch(&state, &name, &headers, query.as_deref(), body).await {
        // the deploy task keeps running without its handle
        Ok(launched) => info!("Deploy {} started for '{}'", launched.id, name),
        Err(rejection) => warn!("{}", rejection),
    }
    StatusCode::OK
}
