//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::{
    CacheKeyArgs, CacheOverrides, CliArgs, Command, InvalidateArgs, RequestArgs, ServeArgs,
    ServeOverrides,
};

use std::{
    collections::{BTreeMap, HashMap},
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{BackendKind, TtlPolicy};
use crate::domain::{EndpointId, ProviderId};
use crate::provider::{EndpointSpec, HttpProviderConfig, Pagination};
use crate::resilience::{CircuitConfig, RetryPolicy};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "portico";
const ENV_PREFIX: &str = "PORTICO";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_KEY_PREFIX: &str = "portico";
const DEFAULT_CACHE_MEMORY_CAPACITY: u64 = 10_000;
const DEFAULT_CACHE_DISK_PATH: &str = "cache";
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MULTIPLIER: f64 = 2.0;
const DEFAULT_RETRY_JITTER: f64 = 0.2;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_RETRY_MAX_ELAPSED_MS: u64 = 15_000;
const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_CIRCUIT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_CIRCUIT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_CIRCUIT_MAX_COOLDOWN_SECS: u64 = 300;
const CIRCUIT_COOLDOWN_CEILING_SECS: u64 = 86_400;
const DEFAULT_UPSTREAM_ATTEMPT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_UPSTREAM_POOL_IDLE_SECS: u64 = 90;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub retry: RetryPolicy,
    pub circuit: CircuitConfig,
    pub upstream: UpstreamSettings,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub key_prefix: String,
    pub memory_capacity: NonZeroUsize,
    pub disk_path: PathBuf,
    pub redis_url: Option<String>,
    pub default_ttl: Duration,
    pub negative_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub attempt_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    pub user_agent: String,
}

/// One configured upstream: how to reach it and how long to keep its answers.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub http: HttpProviderConfig,
    pub ttl: Option<Duration>,
    pub negative_ttl: Option<Duration>,
    pub endpoint_ttls: Vec<EndpointTtl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTtl {
    pub endpoint: EndpointId,
    pub ttl: Option<Duration>,
    pub negative_ttl: Option<Duration>,
}

impl Settings {
    /// Fold global, provider and endpoint TTLs into one policy.
    pub fn ttl_policy(&self) -> TtlPolicy {
        let mut policy = TtlPolicy::new(self.cache.default_ttl, self.cache.negative_ttl);
        for provider in &self.providers {
            let id = provider.http.id.clone();
            if provider.ttl.is_some() || provider.negative_ttl.is_some() {
                policy = policy.with_provider(id.clone(), provider.ttl, provider.negative_ttl);
            }
            for endpoint in &provider.endpoint_ttls {
                if endpoint.ttl.is_some() || endpoint.negative_ttl.is_some() {
                    policy = policy.with_endpoint(
                        id.clone(),
                        endpoint.endpoint.clone(),
                        endpoint.ttl,
                        endpoint.negative_ttl,
                    );
                }
            }
        }
        policy
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Invalidate(args)) => raw.apply_cache_overrides(&args.cache),
        Some(Command::CacheKey(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    retry: RawRetrySettings,
    circuit: RawCircuitSettings,
    upstream: RawUpstreamSettings,
    providers: BTreeMap<String, RawProviderSettings>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(timeout) = overrides.upstream_attempt_timeout_ms {
            self.upstream.attempt_timeout_ms = Some(timeout);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(backend) = overrides.backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(path) = overrides.disk_path.as_ref() {
            self.cache.disk_path = Some(path.clone());
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            retry,
            circuit,
            upstream,
            providers,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let retry = build_retry_policy(retry)?;
        let circuit = build_circuit_config(circuit)?;
        let upstream = build_upstream_settings(upstream)?;
        let providers = providers
            .into_iter()
            .map(|(id, provider)| build_provider_settings(id, provider))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            server,
            logging,
            cache,
            retry,
            circuit,
            upstream,
            providers,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") | Some("memory") => BackendKind::Memory,
        Some("disk") => BackendKind::Disk,
        Some("redis") => BackendKind::Redis,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.backend",
                format!("unknown backend `{other}`, expected memory|disk|redis"),
            ));
        }
    };

    let key_prefix = cache
        .key_prefix
        .unwrap_or_else(|| DEFAULT_CACHE_KEY_PREFIX.to_string());
    if key_prefix.is_empty() || key_prefix.contains(':') {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must be non-empty and must not contain `:`",
        ));
    }

    let capacity = cache
        .memory_capacity
        .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY);
    let memory_capacity = usize::try_from(capacity)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid(
                "cache.memory_capacity",
                "must be greater than zero and fit in usize",
            )
        })?;

    let disk_path = cache
        .disk_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DISK_PATH));
    if disk_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.disk_path",
            "path must not be empty",
        ));
    }

    let redis_url = cache.redis_url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });
    if backend == BackendKind::Redis && redis_url.is_none() {
        return Err(LoadError::invalid(
            "cache.redis_url",
            "required when cache.backend is redis",
        ));
    }

    Ok(CacheSettings {
        backend,
        key_prefix,
        memory_capacity,
        disk_path,
        redis_url,
        default_ttl: Duration::from_secs(
            cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        ),
        negative_ttl: Duration::from_secs(cache.negative_ttl_seconds.unwrap_or(0)),
    })
}

fn build_retry_policy(retry: RawRetrySettings) -> Result<RetryPolicy, LoadError> {
    RetryPolicy::new(
        retry.max_attempts.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
        Duration::from_millis(retry.base_delay_ms.unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS)),
        retry.multiplier.unwrap_or(DEFAULT_RETRY_MULTIPLIER),
        retry.jitter.unwrap_or(DEFAULT_RETRY_JITTER),
        Duration::from_millis(retry.max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS)),
        Duration::from_millis(retry.max_elapsed_ms.unwrap_or(DEFAULT_RETRY_MAX_ELAPSED_MS)),
    )
    .map_err(|err| LoadError::invalid("retry", err.to_string()))
}

fn build_circuit_config(circuit: RawCircuitSettings) -> Result<CircuitConfig, LoadError> {
    let failure_threshold = circuit
        .failure_threshold
        .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD);
    if failure_threshold == 0 {
        return Err(LoadError::invalid(
            "circuit.failure_threshold",
            "must be greater than zero",
        ));
    }

    let cooldown_secs = circuit
        .cooldown_seconds
        .unwrap_or(DEFAULT_CIRCUIT_COOLDOWN_SECS);
    if cooldown_secs == 0 {
        return Err(LoadError::invalid(
            "circuit.cooldown_seconds",
            "must be greater than zero",
        ));
    }

    let backoff_factor = circuit
        .backoff_factor
        .unwrap_or(DEFAULT_CIRCUIT_BACKOFF_FACTOR);
    if !backoff_factor.is_finite() || backoff_factor < 1.0 {
        return Err(LoadError::invalid(
            "circuit.backoff_factor",
            "must be a finite number of at least 1.0",
        ));
    }

    let max_cooldown_secs = circuit
        .max_cooldown_seconds
        .unwrap_or(DEFAULT_CIRCUIT_MAX_COOLDOWN_SECS);
    if max_cooldown_secs < cooldown_secs {
        return Err(LoadError::invalid(
            "circuit.max_cooldown_seconds",
            "must not be below circuit.cooldown_seconds",
        ));
    }
    if max_cooldown_secs > CIRCUIT_COOLDOWN_CEILING_SECS {
        return Err(LoadError::invalid(
            "circuit.max_cooldown_seconds",
            format!("must not exceed {CIRCUIT_COOLDOWN_CEILING_SECS}"),
        ));
    }

    Ok(CircuitConfig {
        failure_threshold,
        cooldown: Duration::from_secs(cooldown_secs),
        backoff_factor,
        max_cooldown: Duration::from_secs(max_cooldown_secs),
    })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let attempt_timeout_ms = upstream
        .attempt_timeout_ms
        .unwrap_or(DEFAULT_UPSTREAM_ATTEMPT_TIMEOUT_MS);
    if attempt_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "upstream.attempt_timeout_ms",
            "must be greater than zero",
        ));
    }

    let connect_timeout_ms = upstream
        .connect_timeout_ms
        .unwrap_or(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_MS);
    if connect_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "upstream.connect_timeout_ms",
            "must be greater than zero",
        ));
    }

    let user_agent = upstream
        .user_agent
        .unwrap_or_else(|| format!("portico/{}", env!("CARGO_PKG_VERSION")));

    Ok(UpstreamSettings {
        attempt_timeout: Duration::from_millis(attempt_timeout_ms),
        connect_timeout: Duration::from_millis(connect_timeout_ms),
        pool_idle_timeout: Duration::from_secs(
            upstream
                .pool_idle_timeout_seconds
                .unwrap_or(DEFAULT_UPSTREAM_POOL_IDLE_SECS),
        ),
        user_agent,
    })
}

fn build_provider_settings(
    id: String,
    raw: RawProviderSettings,
) -> Result<ProviderSettings, LoadError> {
    let key = format!("providers.{id}");
    let provider = ProviderId::parse(id.as_str())
        .map_err(|err| LoadError::invalid(key.clone(), err.to_string()))?;

    let base_url = raw
        .base_url
        .ok_or_else(|| LoadError::invalid(format!("{key}.base_url"), "is required"))?;
    let base_url = Url::parse(&base_url)
        .map_err(|err| LoadError::invalid(format!("{key}.base_url"), err.to_string()))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            format!("{key}.base_url"),
            "scheme must be http or https",
        ));
    }

    let token = raw.token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if raw.endpoints.is_empty() {
        return Err(LoadError::invalid(
            format!("{key}.endpoints"),
            "at least one endpoint is required",
        ));
    }

    let mut endpoints = HashMap::with_capacity(raw.endpoints.len());
    let mut endpoint_ttls = Vec::new();
    for (name, endpoint) in raw.endpoints {
        let endpoint_key = format!("{key}.endpoints.{name}");
        let endpoint_id = EndpointId::parse(name.as_str())
            .map_err(|err| LoadError::invalid(endpoint_key.clone(), err.to_string()))?;
        let path = endpoint
            .path
            .filter(|path| !path.trim().is_empty())
            .ok_or_else(|| LoadError::invalid(format!("{endpoint_key}.path"), "is required"))?;

        let pagination = endpoint
            .pagination
            .map(|raw| build_pagination(raw, &endpoint_key))
            .transpose()?;

        endpoint_ttls.push(EndpointTtl {
            endpoint: endpoint_id.clone(),
            ttl: endpoint.ttl_seconds.map(Duration::from_secs),
            negative_ttl: endpoint.negative_ttl_seconds.map(Duration::from_secs),
        });
        endpoints.insert(
            endpoint_id,
            EndpointSpec {
                path,
                rename: endpoint.rename,
                defaults: endpoint.defaults,
                required: endpoint.required,
                pagination,
            },
        );
    }

    Ok(ProviderSettings {
        http: HttpProviderConfig {
            id: provider,
            base_url,
            token,
            headers: raw.headers.into_iter().collect(),
            forward_language: raw.accept_language.unwrap_or(false),
            endpoints,
        },
        ttl: raw.ttl_seconds.map(Duration::from_secs),
        negative_ttl: raw.negative_ttl_seconds.map(Duration::from_secs),
        endpoint_ttls,
    })
}

fn build_pagination(raw: RawPagination, endpoint_key: &str) -> Result<Pagination, LoadError> {
    let defaults = Pagination::default();
    let default_size = raw.default_size.unwrap_or(defaults.default_size);
    if default_size == 0 {
        return Err(LoadError::invalid(
            format!("{endpoint_key}.pagination.default_size"),
            "must be greater than zero",
        ));
    }

    Ok(Pagination {
        page_param: raw.page_param.unwrap_or(defaults.page_param),
        size_param: raw.size_param.unwrap_or(defaults.size_param),
        offset_param: raw.offset_param.unwrap_or(defaults.offset_param),
        default_size,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    key_prefix: Option<String>,
    memory_capacity: Option<u64>,
    disk_path: Option<PathBuf>,
    redis_url: Option<String>,
    default_ttl_seconds: Option<u64>,
    negative_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    jitter: Option<f64>,
    max_delay_ms: Option<u64>,
    max_elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCircuitSettings {
    failure_threshold: Option<u32>,
    cooldown_seconds: Option<u64>,
    backoff_factor: Option<f64>,
    max_cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    attempt_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    pool_idle_timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProviderSettings {
    base_url: Option<String>,
    token: Option<String>,
    headers: BTreeMap<String, String>,
    accept_language: Option<bool>,
    ttl_seconds: Option<u64>,
    negative_ttl_seconds: Option<u64>,
    endpoints: BTreeMap<String, RawEndpointSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEndpointSettings {
    path: Option<String>,
    rename: BTreeMap<String, String>,
    defaults: BTreeMap<String, String>,
    required: Vec<String>,
    pagination: Option<RawPagination>,
    ttl_seconds: Option<u64>,
    negative_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPagination {
    page_param: Option<String>,
    size_param: Option<String>,
    offset_param: Option<String>,
    default_size: Option<u32>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[cfg(test)]
mod tests;
