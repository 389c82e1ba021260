use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "portico_cache_hit_total",
            Unit::Count,
            "Total number of requests served from a fresh cache entry."
        );
        describe_counter!(
            "portico_cache_miss_total",
            Unit::Count,
            "Total number of requests that had to populate the cache."
        );
        describe_counter!(
            "portico_cache_joined_total",
            Unit::Count,
            "Total number of requests that joined an in-flight population."
        );
        describe_counter!(
            "portico_cache_negative_hit_total",
            Unit::Count,
            "Total number of requests answered from a cached upstream absence."
        );
        describe_counter!(
            "portico_cache_bypass_total",
            Unit::Count,
            "Total number of requests whose endpoint disables caching."
        );
        describe_counter!(
            "portico_cache_backend_error_total",
            Unit::Count,
            "Total number of cache backend failures, labelled by operation."
        );
        describe_counter!(
            "portico_cache_evict_total",
            Unit::Count,
            "Total number of in-memory cache evictions due to capacity."
        );
        describe_counter!(
            "portico_upstream_attempt_total",
            Unit::Count,
            "Total number of upstream invocation attempts, retries included."
        );
        describe_counter!(
            "portico_upstream_failure_total",
            Unit::Count,
            "Total number of failed upstream attempts, labelled by failure kind."
        );
        describe_histogram!(
            "portico_upstream_latency_ms",
            Unit::Milliseconds,
            "Upstream attempt latency in milliseconds."
        );
        describe_histogram!(
            "portico_http_latency_ms",
            Unit::Milliseconds,
            "Gateway response latency in milliseconds, labelled by provider and outcome."
        );
        describe_counter!(
            "portico_circuit_rejected_total",
            Unit::Count,
            "Total number of requests rejected by an open circuit."
        );
        describe_counter!(
            "portico_circuit_transition_total",
            Unit::Count,
            "Total number of circuit state transitions, labelled by target state."
        );
        describe_gauge!(
            "portico_cache_in_flight",
            Unit::Count,
            "Current number of cache keys being populated."
        );
    });
}
