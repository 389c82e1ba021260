use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::ProviderAdapter;
use crate::domain::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no provider registered as `{provider}`")]
pub struct UnknownProvider {
    pub provider: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider `{0}` registered twice")]
    Duplicate(ProviderId),
}

/// Adapters keyed by provider id. Populated at startup, read-only after.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<(), RegistryError> {
        let id = adapter.id().clone();
        if self.adapters.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.adapters.insert(id, adapter);
        Ok(())
    }

    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Result<Self, RegistryError> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn resolve(&self, provider: &ProviderId) -> Result<&Arc<dyn ProviderAdapter>, UnknownProvider> {
        self.adapters.get(provider).ok_or_else(|| UnknownProvider {
            provider: provider.to_string(),
        })
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::domain::{EndpointId, Params};
    use crate::provider::UpstreamError;

    struct Static(ProviderId);

    #[async_trait]
    impl ProviderAdapter for Static {
        fn id(&self) -> &ProviderId {
            &self.0
        }

        async fn invoke(
            &self,
            _endpoint: &EndpointId,
            _params: &Params,
            _language: Option<&str>,
        ) -> Result<Bytes, UpstreamError> {
            Ok(Bytes::from_static(b"{}"))
        }
    }

    fn adapter(id: &str) -> Arc<dyn ProviderAdapter> {
        Arc::new(Static(ProviderId::parse(id).expect("provider id")))
    }

    #[test]
    fn resolves_registered_providers() {
        let registry = ProviderRegistry::new()
            .with(adapter("pixiv"))
            .and_then(|r| r.with(adapter("bilibili")))
            .expect("distinct ids");

        let pixiv = ProviderId::parse("pixiv").expect("id");
        assert_eq!(registry.resolve(&pixiv).expect("registered").id(), &pixiv);
        assert_eq!(
            registry.ids(),
            vec![
                ProviderId::parse("bilibili").expect("id"),
                ProviderId::parse("pixiv").expect("id"),
            ]
        );
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let registry = ProviderRegistry::new();
        let err = match registry.resolve(&ProviderId::parse("nope").expect("id")) {
            Ok(_) => panic!("empty registry resolved a provider"),
            Err(err) => err,
        };
        assert_eq!(err.provider, "nope");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ProviderRegistry::new();
        registry.register(adapter("pixiv")).expect("first");
        let err = registry.register(adapter("pixiv")).expect_err("duplicate");
        assert!(matches!(err, RegistryError::Duplicate(id) if id.as_str() == "pixiv"));
        assert_eq!(registry.len(), 1);
    }
}
