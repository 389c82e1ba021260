//! Upstream provider adapters.
//!
//! Every upstream integration implements [`ProviderAdapter`]. Adapters are
//! registered once at startup in a [`ProviderRegistry`] and selected by the
//! provider segment of a request.

mod error;
pub mod http;
mod registry;

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::{EndpointId, Params, ProviderId, ValidationError};

pub use error::{UpstreamError, UpstreamErrorKind};
pub use http::{EndpointSpec, HttpProvider, HttpProviderConfig, HttpProviderError, Pagination};
pub use registry::{ProviderRegistry, RegistryError, UnknownProvider};

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> &ProviderId;

    /// Check a request before the cache or the circuit are consulted.
    fn validate(&self, _endpoint: &EndpointId, _params: &Params) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Whether answers depend on the caller's language. When false the
    /// language is dropped before the cache key is derived.
    fn varies_by_language(&self) -> bool {
        false
    }

    /// Perform one upstream call and return the raw payload.
    async fn invoke(
        &self,
        endpoint: &EndpointId,
        params: &Params,
        language: Option<&str>,
    ) -> Result<Bytes, UpstreamError>;
}
