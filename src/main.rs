use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use portico::{
    application::{DispatchError, Dispatcher, error::AppError},
    cache::{CacheConfig, CacheKey, CacheManager, open_backend},
    config,
    domain::{RequestDescriptor, preferred_language},
    infra::{
        error::InfraError,
        http::{self, AppState},
        telemetry,
    },
    provider::{HttpProvider, ProviderRegistry},
    resilience::HealthRegistry,
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::CacheKey(args) => run_cache_key(&settings, args.request),
        config::Command::Invalidate(args) => run_invalidate(settings, args.request).await,
    }
}

/// The language only takes part in the key for providers that forward it.
fn descriptor_from_args(
    settings: &config::Settings,
    args: config::RequestArgs,
) -> Result<RequestDescriptor, AppError> {
    let forwards_language = settings
        .providers
        .iter()
        .any(|provider| provider.http.id.as_str() == args.provider && provider.http.forward_language);
    let language = args
        .language
        .as_deref()
        .filter(|_| forwards_language)
        .and_then(preferred_language);
    RequestDescriptor::new(args.provider, args.endpoint, args.params)
        .map(|descriptor| descriptor.with_language(language))
        .map_err(|err| AppError::from(DispatchError::from(err)))
}

fn run_cache_key(settings: &config::Settings, args: config::RequestArgs) -> Result<(), AppError> {
    let descriptor = descriptor_from_args(settings, args)?;
    println!("{}", CacheKey::derive(&settings.cache.key_prefix, &descriptor));
    Ok(())
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::RequestArgs,
) -> Result<(), AppError> {
    let descriptor = descriptor_from_args(&settings, args)?;
    let backend = open_backend(&CacheConfig::from(&settings.cache)).await?;
    let cache: CacheManager<DispatchError> =
        CacheManager::new(backend, settings.ttl_policy(), settings.cache.key_prefix.clone());

    cache.invalidate(&descriptor).await?;
    cache.flush().await?;
    info!(
        target = "portico::invalidate",
        key = %cache.key_for(&descriptor),
        backend = cache.backend_id(),
        "Cache entry invalidated"
    );
    Ok(())
}

fn build_registry(settings: &config::Settings) -> Result<ProviderRegistry, AppError> {
    let client = reqwest::Client::builder()
        .user_agent(settings.upstream.user_agent.as_str())
        .connect_timeout(settings.upstream.connect_timeout)
        .pool_idle_timeout(settings.upstream.pool_idle_timeout)
        .build()
        .map_err(InfraError::from)?;

    let mut registry = ProviderRegistry::new();
    for provider in &settings.providers {
        let adapter = HttpProvider::new(provider.http.clone(), client.clone())?;
        registry.register(Arc::new(adapter))?;
    }

    if registry.is_empty() {
        warn!(
            target = "portico::bootstrap",
            "No providers configured; every request will be rejected"
        );
    }
    Ok(registry)
}

async fn build_dispatcher(settings: &config::Settings) -> Result<Arc<Dispatcher>, AppError> {
    let registry = build_registry(settings)?;
    let backend = open_backend(&CacheConfig::from(&settings.cache)).await?;
    let cache = CacheManager::new(backend, settings.ttl_policy(), settings.cache.key_prefix.clone());
    let health = HealthRegistry::new(settings.circuit);

    let dispatcher = Dispatcher::new(registry, cache, health, settings.retry.clone())
        .with_attempt_timeout(settings.upstream.attempt_timeout);

    info!(
        target = "portico::bootstrap",
        providers = ?dispatcher.registry().ids(),
        "Dispatcher ready"
    );
    Ok(Arc::new(dispatcher))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let dispatcher = build_dispatcher(&settings).await?;
    let router = http::build_router(AppState::new(dispatcher.clone()));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "portico::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!(target = "portico::serve", "Shutdown requested; draining");
        let _ = stop_tx.send(true);
    });

    let server_stop = stop_rx.clone();
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(stopped(server_stop))
        .into_future();
    let drain_deadline = drain_deadline(stop_rx, settings.server.graceful_shutdown);

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::from(InfraError::from(err)))?;
        }
        () = drain_deadline => {
            warn!(
                target = "portico::serve",
                timeout_secs = settings.server.graceful_shutdown.as_secs(),
                "Graceful shutdown timed out; abandoning open connections"
            );
        }
    }

    if let Err(err) = dispatcher.flush().await {
        warn!(target = "portico::serve", error = %err, "Cache flush failed");
    }
    info!(target = "portico::serve", "Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn drain_deadline(stop: watch::Receiver<bool>, grace: Duration) {
    stopped(stop).await;
    tokio::time::sleep(grace).await;
}
