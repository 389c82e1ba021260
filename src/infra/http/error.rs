use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{DispatchError, ErrorReport};
use crate::domain::ValidationError;
use crate::provider::UpstreamErrorKind;

const SOURCE: &str = "infra::http::error";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const UNKNOWN_PROVIDER: &str = "unknown_provider";
    pub const CIRCUIT_OPEN: &str = "circuit_open";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const UPSTREAM_NOT_FOUND: &str = "upstream_not_found";
    pub const UPSTREAM_REJECTED: &str = "upstream_rejected";
    pub const UPSTREAM_AUTH: &str = "upstream_auth";
    pub const UPSTREAM_MALFORMED: &str = "upstream_malformed";
    pub const UPSTREAM_UNAVAILABLE: &str = "upstream_unavailable";
    pub const UPSTREAM_TIMEOUT: &str = "upstream_timeout";
    pub const CACHE_BACKEND: &str = "cache_backend";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    retry_after: Option<Duration>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            retry_after: None,
            report: None,
        }
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Whole seconds for a `Retry-After` header, never below one.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let hint = Some(err.to_string());
        let (status, code, message, retry_after) = match &err {
            DispatchError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                codes::INVALID_REQUEST,
                "Request could not be processed",
                None,
            ),
            DispatchError::UnknownProvider(_) => (
                StatusCode::NOT_FOUND,
                codes::UNKNOWN_PROVIDER,
                "Unknown provider",
                None,
            ),
            DispatchError::CircuitOpen(open) => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CIRCUIT_OPEN,
                "Provider temporarily unavailable",
                Some(open.retry_after),
            ),
            DispatchError::Upstream { error, .. } => match error.kind {
                UpstreamErrorKind::NotFound => (
                    StatusCode::NOT_FOUND,
                    codes::UPSTREAM_NOT_FOUND,
                    "Resource not found upstream",
                    None,
                ),
                UpstreamErrorKind::Rejected => (
                    StatusCode::BAD_REQUEST,
                    codes::UPSTREAM_REJECTED,
                    "Upstream rejected the request",
                    None,
                ),
                UpstreamErrorKind::RateLimited => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    codes::RATE_LIMITED,
                    "Upstream rate limit reached",
                    error.retry_after,
                ),
                UpstreamErrorKind::Authentication => (
                    StatusCode::BAD_GATEWAY,
                    codes::UPSTREAM_AUTH,
                    "Upstream authentication failed",
                    None,
                ),
                UpstreamErrorKind::Malformed => (
                    StatusCode::BAD_GATEWAY,
                    codes::UPSTREAM_MALFORMED,
                    "Upstream returned an unusable response",
                    None,
                ),
                UpstreamErrorKind::Network => (
                    StatusCode::BAD_GATEWAY,
                    codes::UPSTREAM_UNAVAILABLE,
                    "Upstream unavailable",
                    None,
                ),
                UpstreamErrorKind::Timeout => (
                    StatusCode::GATEWAY_TIMEOUT,
                    codes::UPSTREAM_TIMEOUT,
                    "Upstream did not respond in time",
                    None,
                ),
            },
            DispatchError::Backend(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE_BACKEND,
                "Cache backend unavailable",
                None,
            ),
        };

        let report = ErrorReport::from_error(SOURCE, status, &err);
        Self {
            report: Some(report),
            ..Self::new(status, code, message, hint).with_retry_after(retry_after)
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self::from(DispatchError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| ErrorReport {
            source: SOURCE,
            status: self.status,
            messages: vec![format!(
                "{}: {}",
                self.code,
                self.hint.as_deref().unwrap_or(self.message)
            )],
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs(retry_after).to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderId;
    use crate::provider::UpstreamError;
    use crate::resilience::CircuitOpen;

    fn upstream(error: UpstreamError) -> ApiError {
        let provider = ProviderId::parse("demo").expect("provider");
        ApiError::from(DispatchError::upstream(&provider, error))
    }

    #[test]
    fn upstream_kinds_map_to_status_classes() {
        let cases = [
            (UpstreamError::not_found("x"), StatusCode::NOT_FOUND),
            (UpstreamError::rejected("x"), StatusCode::BAD_REQUEST),
            (UpstreamError::rate_limited("x", None), StatusCode::SERVICE_UNAVAILABLE),
            (UpstreamError::authentication("x"), StatusCode::BAD_GATEWAY),
            (UpstreamError::malformed("x"), StatusCode::BAD_GATEWAY),
            (UpstreamError::network("x"), StatusCode::BAD_GATEWAY),
            (UpstreamError::timeout("x"), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (error, status) in cases {
            let kind = error.kind;
            assert_eq!(upstream(error).status(), status, "{kind}");
        }
    }

    #[test]
    fn circuit_open_sets_retry_after() {
        let err = ApiError::from(DispatchError::CircuitOpen(CircuitOpen {
            provider: ProviderId::parse("demo").expect("provider"),
            retry_after: Duration::from_millis(2500),
        }));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = err.into_response();
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("3"))
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn validation_is_bad_request() {
        let err = ApiError::from(ValidationError::missing("id"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), codes::INVALID_REQUEST);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
        assert_eq!(retry_after_secs(Duration::from_millis(30_001)), 31);
    }
}
