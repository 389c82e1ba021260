//! Request correlation and response logging for the gateway surface.

use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, Uri},
    middleware::Next,
    response::Response,
};
use metrics::histogram;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::handlers::CACHE_STATUS_HEADER;
use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const METRIC_HTTP_LATENCY_MS: &str = "portico_http_latency_ms";
const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// Provider and endpoint named by an `/api/{provider}/{endpoint}` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget<'a> {
    pub provider: &'a str,
    pub endpoint: &'a str,
}

impl<'a> RouteTarget<'a> {
    pub fn from_uri(uri: &'a Uri) -> Option<Self> {
        let mut segments = uri.path().strip_prefix("/api/")?.split('/');
        let provider = segments.next().filter(|s| !s.is_empty())?;
        let endpoint = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self { provider, endpoint })
    }
}

/// Reuse a caller-supplied id when it is a sane header token.
fn inbound_request_id(request: &Request<Body>) -> Option<String> {
    let raw = request.headers().get(&REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let usable = !raw.is_empty()
        && raw.len() <= MAX_REQUEST_ID_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    usable.then(|| raw.to_string())
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id =
        inbound_request_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
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
    let elapsed = start.elapsed();
    let target = RouteTarget::from_uri(&uri);
    let provider = target.as_ref().map_or("", |t| t.provider);
    let endpoint = target.as_ref().map_or("", |t| t.endpoint);

    let cache = response
        .headers()
        .get(&CACHE_STATUS_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none")
        .to_string();

    if target.is_some() {
        let outcome = if status.is_success() {
            cache.clone()
        } else {
            status.as_u16().to_string()
        };
        histogram!(
            METRIC_HTTP_LATENCY_MS,
            "provider" => provider.to_string(),
            "outcome" => outcome
        )
        .record(elapsed.as_secs_f64() * 1000.0);
    }

    if status.is_success() {
        debug!(
            target: "portico::http::response",
            status = status.as_u16(),
            method = %method,
            provider,
            endpoint,
            cache = cache.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            request_id = request_id,
            "request served",
        );
        return response;
    }

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
                target: "portico::http::response",
                status = status.as_u16(),
                method = %method,
                provider,
                endpoint,
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed.as_millis() as u64,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "upstream request failed",
            );
        } else {
            warn!(
                target: "portico::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                provider,
                endpoint,
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed.as_millis() as u64,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                "request rejected",
            );
        }
    }

    response
}
