//! TTL policy per endpoint class.
//!
//! Resolution order: endpoint override, then provider override, then the
//! global default. A resolved TTL of zero marks the endpoint uncacheable.

use std::collections::HashMap;
use std::time::Duration;

use crate::domain::{EndpointId, ProviderId, RequestDescriptor};

/// Effective caching rule for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlRule {
    pub ttl: Duration,
    pub negative_ttl: Duration,
}

impl TtlRule {
    pub fn is_cacheable(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn caches_absence(&self) -> bool {
        self.is_cacheable() && !self.negative_ttl.is_zero()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TtlOverride {
    ttl: Option<Duration>,
    negative_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct TtlPolicy {
    default: TtlRule,
    providers: HashMap<ProviderId, TtlOverride>,
    endpoints: HashMap<(ProviderId, EndpointId), TtlOverride>,
}

impl TtlPolicy {
    pub fn new(default_ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            default: TtlRule {
                ttl: default_ttl,
                negative_ttl,
            },
            providers: HashMap::new(),
            endpoints: HashMap::new(),
        }
    }

    pub fn with_provider(
        mut self,
        provider: ProviderId,
        ttl: Option<Duration>,
        negative_ttl: Option<Duration>,
    ) -> Self {
        self.providers
            .insert(provider, TtlOverride { ttl, negative_ttl });
        self
    }

    pub fn with_endpoint(
        mut self,
        provider: ProviderId,
        endpoint: EndpointId,
        ttl: Option<Duration>,
        negative_ttl: Option<Duration>,
    ) -> Self {
        self.endpoints
            .insert((provider, endpoint), TtlOverride { ttl, negative_ttl });
        self
    }

    pub fn rule_for(&self, descriptor: &RequestDescriptor) -> TtlRule {
        let provider = self.providers.get(descriptor.provider());
        let endpoint = self
            .endpoints
            .get(&(descriptor.provider().clone(), descriptor.endpoint().clone()));

        let ttl = endpoint
            .and_then(|o| o.ttl)
            .or_else(|| provider.and_then(|o| o.ttl))
            .unwrap_or(self.default.ttl);
        let negative_ttl = endpoint
            .and_then(|o| o.negative_ttl)
            .or_else(|| provider.and_then(|o| o.negative_ttl))
            .unwrap_or(self.default.negative_ttl);

        TtlRule { ttl, negative_ttl }
    }
}
