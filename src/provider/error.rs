use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// What went wrong talking to an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamErrorKind {
    /// Connection failure or upstream 5xx.
    Network,
    /// The attempt deadline expired.
    Timeout,
    RateLimited,
    Authentication,
    NotFound,
    /// Upstream refused the request as malformed (4xx other than the above).
    Rejected,
    /// Upstream answered with something we cannot use.
    Malformed,
}

impl UpstreamErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamErrorKind::Network => "network",
            UpstreamErrorKind::Timeout => "timeout",
            UpstreamErrorKind::RateLimited => "rate_limited",
            UpstreamErrorKind::Authentication => "authentication",
            UpstreamErrorKind::NotFound => "not_found",
            UpstreamErrorKind::Rejected => "rejected",
            UpstreamErrorKind::Malformed => "malformed",
        }
    }

    /// Retryability used when an adapter does not decide otherwise.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            UpstreamErrorKind::Network | UpstreamErrorKind::Timeout | UpstreamErrorKind::RateLimited
        )
    }
}

impl fmt::Display for UpstreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a [`ProviderAdapter`](super::ProviderAdapter).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} upstream failure: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub retryable: bool,
    pub message: String,
    /// Server-provided hint for when to try again.
    pub retry_after: Option<Duration>,
}

impl UpstreamError {
    pub fn new(kind: UpstreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.default_retryable(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(UpstreamErrorKind::RateLimited, message)
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Authentication, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::NotFound, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(UpstreamErrorKind::Malformed, message)
    }

    /// Override the default retryability for this kind.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Whether this failure says anything about the provider's health.
    ///
    /// A not-found or a rejected request means the upstream answered.
    pub fn counts_against_health(&self) -> bool {
        !matches!(
            self.kind,
            UpstreamErrorKind::NotFound | UpstreamErrorKind::Rejected
        )
    }
}
