use clap::Parser;
use config::FileFormat;

use super::*;
use crate::domain::RequestDescriptor;

fn raw_from_toml(toml: &str) -> RawSettings {
    Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .expect("config builds")
        .try_deserialize()
        .expect("raw settings deserialize")
}

fn invalid_key(err: LoadError) -> String {
    match err {
        LoadError::Invalid { key, .. } => key,
        other => panic!("expected invalid configuration, got {other}"),
    }
}

const PIXIV: &str = r#"
[providers.pixiv]
base_url = "https://app-api.pixiv.net/v1"
token = "  secret  "
accept_language = true
ttl_seconds = 600

[providers.pixiv.headers]
Referer = "https://www.pixiv.net/"

[providers.pixiv.endpoints.user_following]
path = "user/following"
required = ["id"]
ttl_seconds = 120

[providers.pixiv.endpoints.user_following.rename]
id = "user_id"

[providers.pixiv.endpoints.user_following.defaults]
filter = "for_ios"

[providers.pixiv.endpoints.user_following.pagination]
default_size = 20

[providers.pixiv.endpoints.ugoira]
path = "ugoira/metadata"
ttl_seconds = 0
"#;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert_eq!(settings.cache.backend, BackendKind::Memory);
    assert_eq!(settings.cache.key_prefix, "portico");
    assert_eq!(settings.cache.default_ttl, Duration::from_secs(3600));
    assert!(settings.cache.negative_ttl.is_zero());
    assert_eq!(settings.retry, RetryPolicy::default());
    assert_eq!(settings.circuit, CircuitConfig::default());
    assert_eq!(
        settings.upstream.attempt_timeout,
        Duration::from_millis(10_000)
    );
    assert!(settings.upstream.user_agent.starts_with("portico/"));
    assert!(settings.providers.is_empty());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = raw_from_toml(
        r#"
        [server]
        port = 4000

        [logging]
        level = "info"

        [cache]
        backend = "memory"
        "#,
    );

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        cache: CacheOverrides {
            backend: Some("disk".to_string()),
            disk_path: Some(PathBuf::from("/var/cache/portico")),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.cache.backend, BackendKind::Disk);
    assert_eq!(
        settings.cache.disk_path,
        PathBuf::from("/var/cache/portico")
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn unknown_backend_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("memcached".to_string());

    let err = Settings::from_raw(raw).expect_err("unknown backend");
    assert_eq!(invalid_key(err), "cache.backend");
}

#[test]
fn redis_backend_requires_url() {
    let mut raw = RawSettings::default();
    raw.cache.backend = Some("redis".to_string());
    raw.cache.redis_url = Some("   ".to_string());

    let err = Settings::from_raw(raw).expect_err("redis without url");
    assert_eq!(invalid_key(err), "cache.redis_url");
}

#[test]
fn key_prefix_must_not_contain_separator() {
    let mut raw = RawSettings::default();
    raw.cache.key_prefix = Some("a:b".to_string());

    let err = Settings::from_raw(raw).expect_err("prefix with separator");
    assert_eq!(invalid_key(err), "cache.key_prefix");
}

#[test]
fn retry_multiplier_must_outgrow_jitter() {
    let mut raw = RawSettings::default();
    raw.retry.multiplier = Some(1.1);
    raw.retry.jitter = Some(0.2);

    let err = Settings::from_raw(raw).expect_err("multiplier too small");
    assert_eq!(invalid_key(err), "retry");
}

#[test]
fn circuit_max_cooldown_not_below_cooldown() {
    let mut raw = RawSettings::default();
    raw.circuit.cooldown_seconds = Some(60);
    raw.circuit.max_cooldown_seconds = Some(30);

    let err = Settings::from_raw(raw).expect_err("max below base");
    assert_eq!(invalid_key(err), "circuit.max_cooldown_seconds");
}

#[test]
fn circuit_backoff_must_be_finite() {
    let mut raw = RawSettings::default();
    raw.circuit.backoff_factor = Some(f64::INFINITY);

    let err = Settings::from_raw(raw).expect_err("infinite backoff");
    assert_eq!(invalid_key(err), "circuit.backoff_factor");
}

#[test]
fn circuit_max_cooldown_is_bounded() {
    let mut raw = RawSettings::default();
    raw.circuit.max_cooldown_seconds = Some(u64::MAX);

    let err = Settings::from_raw(raw).expect_err("unbounded cooldown");
    assert_eq!(invalid_key(err), "circuit.max_cooldown_seconds");
}

#[test]
fn providers_are_built_from_tables() {
    let settings = Settings::from_raw(raw_from_toml(PIXIV)).expect("valid settings");
    assert_eq!(settings.providers.len(), 1);

    let provider = &settings.providers[0];
    assert_eq!(provider.http.id.as_str(), "pixiv");
    assert_eq!(provider.http.token.as_deref(), Some("secret"));
    assert!(provider.http.forward_language);
    assert_eq!(provider.ttl, Some(Duration::from_secs(600)));
    assert_eq!(provider.http.endpoints.len(), 2);

    let following = EndpointId::parse("user_following").expect("endpoint id");
    let spec = &provider.http.endpoints[&following];
    assert_eq!(spec.path, "user/following");
    assert_eq!(spec.required, vec!["id".to_string()]);
    assert_eq!(spec.rename.get("id").map(String::as_str), Some("user_id"));
    assert_eq!(
        spec.defaults.get("filter").map(String::as_str),
        Some("for_ios")
    );
    let pagination = spec.pagination.as_ref().expect("pagination");
    assert_eq!(pagination.default_size, 20);
    assert_eq!(pagination.page_param, "page");
}

#[test]
fn ttl_policy_layers_endpoint_over_provider_over_global() {
    let settings = Settings::from_raw(raw_from_toml(PIXIV)).expect("valid settings");
    let policy = settings.ttl_policy();

    let following =
        RequestDescriptor::new("pixiv", "user_following", [("id", "7")]).expect("descriptor");
    let ugoira = RequestDescriptor::new("pixiv", "ugoira", [("id", "1")]).expect("descriptor");
    let other = RequestDescriptor::new("bilibili", "video", [("id", "1")]).expect("descriptor");

    assert_eq!(
        policy.rule_for(&following).ttl,
        Duration::from_secs(120)
    );
    assert!(!policy.rule_for(&ugoira).is_cacheable());
    assert_eq!(policy.rule_for(&other).ttl, Duration::from_secs(3600));
}

#[test]
fn language_forwarding_is_opt_in() {
    let raw = raw_from_toml(
        r#"
        [providers.demo]
        base_url = "https://example.com"

        [providers.demo.endpoints.item]
        path = "items"
        "#,
    );
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.providers[0].http.forward_language);
}

#[test]
fn provider_without_base_url_is_rejected() {
    let raw = raw_from_toml(
        r#"
        [providers.demo.endpoints.item]
        path = "items"
        "#,
    );

    let err = Settings::from_raw(raw).expect_err("missing base url");
    assert_eq!(invalid_key(err), "providers.demo.base_url");
}

#[test]
fn endpoint_without_path_is_rejected() {
    let raw = raw_from_toml(
        r#"
        [providers.demo]
        base_url = "https://example.test/api"

        [providers.demo.endpoints.item]
        ttl_seconds = 10
        "#,
    );

    let err = Settings::from_raw(raw).expect_err("missing path");
    assert_eq!(invalid_key(err), "providers.demo.endpoints.item.path");
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["portico"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "portico",
        "serve",
        "--server-port",
        "9090",
        "--log-json",
        "yes",
        "--cache-backend",
        "redis",
        "--cache-redis-url",
        "redis://127.0.0.1:6379",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            let overrides = serve.overrides;
            assert_eq!(overrides.server_port, Some(9090));
            assert_eq!(overrides.log_json, Some(true));
            assert_eq!(overrides.cache.backend.as_deref(), Some("redis"));
            assert_eq!(
                overrides.cache.redis_url.as_deref(),
                Some("redis://127.0.0.1:6379")
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_cache_key_arguments() {
    let args = CliArgs::parse_from([
        "portico",
        "cache-key",
        "--language",
        "ja-JP",
        "pixiv",
        "user_following",
        "id=7",
        "page=2",
        "tag=",
    ]);

    match args.command.expect("cache-key command") {
        Command::CacheKey(cache_key) => {
            let request = cache_key.request;
            assert_eq!(request.provider, "pixiv");
            assert_eq!(request.endpoint, "user_following");
            assert_eq!(request.language.as_deref(), Some("ja-JP"));
            assert_eq!(
                request.params,
                vec![
                    ("id".to_string(), "7".to_string()),
                    ("page".to_string(), "2".to_string()),
                    ("tag".to_string(), String::new()),
                ]
            );
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_invalidate_arguments() {
    let args = CliArgs::parse_from([
        "portico",
        "invalidate",
        "--cache-backend",
        "disk",
        "demo",
        "item",
        "id=42",
    ]);

    match args.command.expect("invalidate command") {
        Command::Invalidate(invalidate) => {
            assert_eq!(invalidate.cache.backend.as_deref(), Some("disk"));
            assert_eq!(invalidate.request.provider, "demo");
            assert_eq!(invalidate.request.params.len(), 1);
            assert_eq!(invalidate.request.language, None);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn malformed_param_is_rejected() {
    let result = CliArgs::try_parse_from(["portico", "cache-key", "demo", "item", "id"]);
    assert!(result.is_err());
}
