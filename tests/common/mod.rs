#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use portico::application::Dispatcher;
use portico::cache::{CacheBackend, CacheManager, MemoryBackend, TtlPolicy};
use portico::domain::{EndpointId, Params, ProviderId, ValidationError};
use portico::provider::{ProviderAdapter, ProviderRegistry, UpstreamError};
use portico::resilience::{CircuitConfig, HealthRegistry, RetryPolicy};

type Script = dyn Fn(&EndpointId, &Params, usize) -> Result<Bytes, UpstreamError> + Send + Sync;

fn echo_script(endpoint: &EndpointId, params: &Params, call: usize) -> Result<Bytes, UpstreamError> {
    let body = serde_json::json!({
        "endpoint": endpoint.as_str(),
        "params": params,
        "call": call,
    });
    Ok(Bytes::from(body.to_string()))
}

/// In-process provider whose answers come from a closure.
pub struct ScriptedAdapter {
    id: ProviderId,
    calls: AtomicUsize,
    localized: bool,
    last_language: Mutex<Option<String>>,
    script: Box<Script>,
}

impl ScriptedAdapter {
    pub fn new(
        id: &str,
        script: impl Fn(&EndpointId, &Params, usize) -> Result<Bytes, UpstreamError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Self::build(id, false, Box::new(script))
    }

    fn build(id: &str, localized: bool, script: Box<Script>) -> Arc<Self> {
        Arc::new(Self {
            id: ProviderId::parse(id).expect("provider id"),
            calls: AtomicUsize::new(0),
            localized,
            last_language: Mutex::new(None),
            script,
        })
    }

    /// Echoes the endpoint and parameters back as JSON.
    pub fn echo(id: &str) -> Arc<Self> {
        Self::build(id, false, Box::new(echo_script))
    }

    /// Like [`ScriptedAdapter::echo`], but answers vary by caller language.
    pub fn localized_echo(id: &str) -> Arc<Self> {
        Self::build(id, true, Box::new(echo_script))
    }

    pub fn last_language(&self) -> Option<String> {
        self.last_language.lock().expect("language slot").clone()
    }

    /// Fails every invocation with a retryable network error.
    pub fn failing(id: &str) -> Arc<Self> {
        Self::new(id, |_, _, _| Err(UpstreamError::network("connection reset")))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn validate(&self, endpoint: &EndpointId, params: &Params) -> Result<(), ValidationError> {
        if endpoint.as_str() == "item" && !params.contains_key("id") {
            return Err(ValidationError::missing("id"));
        }
        Ok(())
    }

    fn varies_by_language(&self) -> bool {
        self.localized
    }

    async fn invoke(
        &self,
        endpoint: &EndpointId,
        params: &Params,
        language: Option<&str>,
    ) -> Result<Bytes, UpstreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_language.lock().expect("language slot") = language.map(str::to_string);
        (self.script)(endpoint, params, call)
    }
}

pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(5),
        2.0,
        0.2,
        Duration::from_millis(50),
        Duration::from_secs(2),
    )
    .expect("valid retry policy")
}

pub fn memory_backend() -> Arc<dyn CacheBackend> {
    Arc::new(MemoryBackend::new(
        NonZeroUsize::new(256).expect("non-zero capacity"),
    ))
}

pub fn default_policy() -> TtlPolicy {
    TtlPolicy::new(Duration::from_secs(3600), Duration::ZERO)
}

pub struct Harness {
    pub adapters: Vec<Arc<dyn ProviderAdapter>>,
    pub backend: Arc<dyn CacheBackend>,
    pub policy: TtlPolicy,
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
}

impl Harness {
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            adapters,
            backend: memory_backend(),
            policy: default_policy(),
            retry: quick_retry(1),
            circuit: CircuitConfig::default(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit.failure_threshold = threshold;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut registry = ProviderRegistry::new();
        for adapter in self.adapters {
            registry.register(adapter).expect("unique provider ids");
        }
        let cache = CacheManager::new(self.backend, self.policy, "it");
        Dispatcher::new(registry, cache, HealthRegistry::new(self.circuit), self.retry)
    }
}
