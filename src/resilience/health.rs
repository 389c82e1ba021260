use std::sync::Arc;

use dashmap::DashMap;

use super::circuit::{CircuitBreaker, CircuitConfig, HealthSnapshot};
use crate::domain::ProviderId;

/// One circuit breaker per provider, created on first use.
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    config: CircuitConfig,
    breakers: Arc<DashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl HealthRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Pre-create breakers so snapshots list every configured provider.
    pub fn with_providers<'a>(self, providers: impl IntoIterator<Item = &'a ProviderId>) -> Self {
        for provider in providers {
            self.breaker(provider);
        }
        self
    }

    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(provider) {
            return Arc::clone(existing.value());
        }
        let created = self
            .breakers
            .entry(provider.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider.clone(), self.config)));
        Arc::clone(created.value())
    }

    /// Snapshots sorted by provider id.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.provider.cmp(&b.provider));
        snapshots
    }
}
