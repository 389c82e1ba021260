use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    cache::{BackendError, PopulateError},
    config::LoadError,
    domain::{ProviderId, RequestDescriptor, ValidationError},
    infra::error::InfraError,
    provider::{HttpProviderError, RegistryError, UnknownProvider, UpstreamError, UpstreamErrorKind},
    resilience::CircuitOpen,
};

/// Diagnostic detail attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Outcome of a failed dispatch.
///
/// Cloneable so one single-flight outcome can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
    #[error("provider `{provider}`: {error}")]
    Upstream {
        provider: ProviderId,
        error: UpstreamError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl DispatchError {
    pub fn upstream(provider: &ProviderId, error: UpstreamError) -> Self {
        Self::Upstream {
            provider: provider.clone(),
            error,
        }
    }

    /// The upstream failure kind, when there is one.
    pub fn upstream_kind(&self) -> Option<UpstreamErrorKind> {
        match self {
            DispatchError::Upstream { error, .. } => Some(error.kind),
            _ => None,
        }
    }
}

impl PopulateError for DispatchError {
    fn absence(&self) -> Option<&str> {
        match self {
            DispatchError::Upstream { error, .. } if error.kind == UpstreamErrorKind::NotFound => {
                Some(error.message.as_str())
            }
            _ => None,
        }
    }

    fn from_absence(descriptor: &RequestDescriptor, message: &str) -> Self {
        Self::upstream(descriptor.provider(), UpstreamError::not_found(message))
    }
}

/// Process-level failure that ends a command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Provider(#[from] HttpProviderError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
