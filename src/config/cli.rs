use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the Portico binary.
#[derive(Debug, Parser)]
#[command(
    name = "portico",
    version,
    about = "Caching gateway for upstream JSON APIs"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PORTICO_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the gateway HTTP service.
    Serve(Box<ServeArgs>),
    /// Print the cache key a request would be stored under.
    #[command(name = "cache-key")]
    CacheKey(CacheKeyArgs),
    /// Delete the cached entry of a request from the configured backend.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the cache backend (memory|disk|redis).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Override the disk backend root directory.
    #[arg(long = "cache-disk-path", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub disk_path: Option<PathBuf>,

    /// Override the redis backend connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub redis_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the per-attempt upstream deadline.
    #[arg(long = "upstream-attempt-timeout-ms", value_name = "MILLIS")]
    pub upstream_attempt_timeout_ms: Option<u64>,
}

/// A request given on the command line as `provider endpoint [name=value..]`.
#[derive(Debug, Args, Clone)]
pub struct RequestArgs {
    /// Provider id.
    #[arg(value_name = "PROVIDER")]
    pub provider: String,

    /// Endpoint id.
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// Request parameters.
    #[arg(value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Caller language, as an `Accept-Language` value.
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CacheKeyArgs {
    #[command(flatten)]
    pub request: RequestArgs,
}

#[derive(Debug, Args, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    #[command(flatten)]
    pub request: RequestArgs,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("parameter name is empty in `{raw}`"));
    }
    Ok((name.to_string(), value.to_string()))
}
