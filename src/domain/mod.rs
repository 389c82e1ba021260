//! Request model shared by every layer of the gateway.

pub mod error;
pub mod request;

pub use error::ValidationError;
pub use request::{EndpointId, Params, ProviderId, RequestDescriptor, preferred_language};
