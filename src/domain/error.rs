use thiserror::Error;

/// A request that cannot be dispatched because of its own shape.
///
/// Raised before the cache or any provider health state is consulted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} `{value}`: {reason}")]
    Identifier {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("parameter `{name}` supplied more than once")]
    DuplicateParam { name: String },
    #[error("parameter `{name}` is invalid: {reason}")]
    Param { name: String, reason: String },
    #[error("too many parameters: {count} exceeds the limit of {limit}")]
    TooManyParams { count: usize, limit: usize },
    #[error("endpoint `{endpoint}` is not served by provider `{provider}`")]
    UnknownEndpoint { provider: String, endpoint: String },
    #[error("missing required parameter `{name}`")]
    MissingParam { name: String },
}

impl ValidationError {
    pub fn param(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Param {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingParam { name: name.into() }
    }
}
