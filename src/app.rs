/*
 * Responsibility
 * - Config読み込み → 依存生成 (cache / identity / discovery) → Router 組み立て
 * - Middleware の適用 (health / http / CORS / Bearer)
 * - axum::serve() で起動。起動時の失敗 (設定不備、metadata 取得失敗、
 *   初回 discovery 失敗) はここで fatal にする
 */
use std::{panic, process, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, DiscoveryMode, DiscoveryProviderKind};
use crate::middleware;
use crate::proxy;
use crate::services::cache::{MemoryCache, SharedCache, ValkeyCache};
use crate::services::discovery::{
    ConfiguredProvider, DiscoveryHandle, DiscoveryProvider, DnsProvider,
};
use crate::services::exchange::{IdentityClient, TokenExchanger};
use crate::services::scopes::ScopeResolver;
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,obo_gateway=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get "lost"
        // (stderr can be hidden depending on how the process is launched.)
        tracing::error!(?info, "panic");

        // In development, fail fast: crash the whole process so we notice immediately.
        // In production, prefer the default behavior (stderr) and let the server keep running.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("configuration")?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    tracing::info!(
        "starting gateway in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let addr = config.addr;
    let state = build_state(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app).await.context("serve")?;

    Ok(())
}

/// Build process-level services and inject them into the shared state.
/// Everything here is constructed exactly once; request handlers only read.
pub async fn build_state(config: Config) -> Result<AppState> {
    let config = Arc::new(config);

    let http = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()
        .context("http client")?;

    let cache: SharedCache = match &config.cache_connection {
        Some(url) => Arc::new(
            ValkeyCache::new(url)
                .await
                .context("cache connection")?,
        ),
        None => Arc::new(MemoryCache::new()),
    };
    tracing::info!(backend = cache.backend_name(), "token cache ready");

    // The confidential-client identity: one per process. Metadata resolution
    // happens here so an unreachable provider fails the boot, not a request.
    let identity = IdentityClient::discover(
        http.clone(),
        &config.auth_metadata_address,
        config.auth_client_id.clone(),
        config.auth_client_secret.clone(),
    )
    .await
    .context("identity provider metadata")?;

    let exchanger = Arc::new(TokenExchanger::new(
        cache,
        identity,
        config.cache_sliding_expiration,
        config.upstream_timeout,
    ));

    let provider: Arc<dyn DiscoveryProvider> = match config.discovery_provider {
        DiscoveryProviderKind::Configured => {
            Arc::new(ConfiguredProvider::new(&config.discovery_endpoints))
        }
        DiscoveryProviderKind::Dns => {
            // Presence is validated in Config::from_env.
            let name = config.discovery_dns_name.clone().unwrap_or_default();
            Arc::new(DnsProvider::new(name))
        }
    };

    let discovery = match config.discovery_mode {
        DiscoveryMode::Static => DiscoveryHandle::direct(provider, config.upstream_timeout),
        DiscoveryMode::Polling => DiscoveryHandle::polling(
            provider,
            config.discovery_poll_interval,
            config.upstream_timeout,
        )
        .await
        .context("initial discovery refresh")?,
    };

    let scopes = Arc::new(ScopeResolver::new(
        config.scope_mode,
        config.scope_map.clone(),
        config.default_scopes.clone(),
    ));

    Ok(AppState::new(config, scopes, exchanger, discovery, http))
}

pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    // Every non-healthcheck path goes through auth and then the proxy.
    let router = Router::new().fallback(proxy::forward);
    let router = middleware::auth::access::apply(router, state.clone());
    let router = router.with_state(state);

    let router = middleware::cors::apply(router, &config);
    let router = middleware::http::apply(router, config.upstream_timeout);

    // Outermost: probes answer before auth/exchange/discovery run.
    middleware::health::apply(router)
}
