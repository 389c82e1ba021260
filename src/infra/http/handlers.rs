use axum::Json;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::cache::CacheMode;
use crate::domain::{RequestDescriptor, preferred_language};
use crate::resilience::{CircuitState, HealthSnapshot};

use super::error::ApiError;
use super::state::AppState;

pub const CACHE_STATUS_HEADER: HeaderName = HeaderName::from_static("x-cache");

/// Split a raw query string into pairs, keeping repeated names so they can
/// be rejected instead of silently collapsed.
pub fn query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    raw.map(|raw| {
        url::form_urlencoded::parse(raw.as_bytes())
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect()
    })
    .unwrap_or_default()
}

fn cache_mode(headers: &HeaderMap) -> CacheMode {
    let refresh = headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|directive| directive.trim().eq_ignore_ascii_case("no-cache"));
    if refresh {
        CacheMode::Refresh
    } else {
        CacheMode::Normal
    }
}

fn caller_language(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(preferred_language)
}

pub async fn dispatch(
    State(state): State<AppState>,
    Path((provider, endpoint)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let descriptor = RequestDescriptor::new(provider, endpoint, query_pairs(query.as_deref()))?
        .with_language(caller_language(&headers));
    let fetched = state
        .dispatcher
        .handle_with(&descriptor, cache_mode(&headers))
        .await?;

    Ok((
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            ),
            (
                CACHE_STATUS_HEADER,
                HeaderValue::from_static(fetched.status.as_str()),
            ),
        ],
        fetched.payload,
    )
        .into_response())
}

pub async fn invalidate(
    State(state): State<AppState>,
    Path((provider, endpoint)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let descriptor = RequestDescriptor::new(provider, endpoint, query_pairs(query.as_deref()))?
        .with_language(caller_language(&headers));
    state.dispatcher.invalidate(&descriptor).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub providers: Vec<HealthSnapshot>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    let providers = state.dispatcher.health();
    let status = if providers
        .iter()
        .all(|snapshot| snapshot.state == CircuitState::Closed)
    {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthBody { status, providers })
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
