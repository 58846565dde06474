//! tractcored — boots the personalization and real-time synchronization
//! engine: loads configuration, opens the repository, warms every tenant's
//! caches, and serves the HTTP surface.

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, routing::get, Router};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tractcore::api::{routes, AppState};
use tractcore::auth::{api as auth_api, auth_middleware, AuthState, JwtHandler, UserStore};
use tractcore::cache::CacheManager;
use tractcore::middleware::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
use tractcore::repository::{Repository, SqliteRepository};
use tractcore::sse::SseHub;
use tractcore::{tenant, warmer, Config};

/// CLI flags, each falling back to the `TRACTCORE_*` env var `Config::from_env`
/// already reads, so an operator can override a single value without a .env
/// edit (e.g. `tractcored --port 9000`).
#[derive(Parser, Debug)]
#[command(name = "tractcored", about = "Personalization and real-time sync engine")]
struct Cli {
    #[arg(long, env = "TRACTCORE_BIND_ADDR")]
    bind_addr: Option<String>,

    #[arg(long, env = "TRACTCORE_PORT")]
    port: Option<u16>,

    #[arg(long, env = "TRACTCORE_DATABASE_PATH")]
    database_path: Option<String>,

    /// Skips the boot-time per-tenant warm sequence (spec.md §4.J). Useful
    /// for a quick local start against an empty database.
    #[arg(long)]
    skip_warm: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(bind_addr) = cli.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database_path) = cli.database_path {
        config.database_path = database_path;
    }
    let config = Arc::new(config);

    info!("tractcore engine starting");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")?;

    let repository: Arc<dyn Repository> = Arc::new(
        SqliteRepository::new(config.database_path.clone())
            .context("failed to open the repository database")?,
    );
    info!(path = %config.database_path, "repository database opened");

    let user_store =
        Arc::new(UserStore::new(&config.database_path).context("failed to open the user store")?);
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store, jwt_handler.clone());

    let cache = CacheManager::new();
    let sse_hub = Arc::new(SseHub::new(config.sse_channel_capacity));

    let tenant_ids = tenant::discover_tenant_ids();
    info!(tenants = ?tenant_ids, "tenant namespaces discovered");
    tenant::initialize_tenants(&cache, &tenant_ids);

    if cli.skip_warm {
        info!("skipping boot-time tenant warm sequence (--skip-warm)");
    } else {
        warmer::warm_all_tenants(&cache).await;
    }

    tokio::spawn(warmer::run_cleanup_worker(
        cache.clone(),
        config.cleanup_tick,
        config.visit_ttl,
        config.fingerprint_idle_ttl,
        config.html_chunk_cache_capacity,
    ));

    let app_state = AppState {
        cache,
        repository,
        sse_hub,
        auth: auth_state.clone(),
        config: config.clone(),
    };

    let auth_router = Router::new()
        .route("/api/auth/login", axum::routing::post(auth_api::login))
        .with_state(auth_state);

    let rate_limiter = RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window: Duration::from_secs(config.rate_limit_window_secs),
        burst: config.rate_limit_burst,
    });
    {
        let rate_limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                rate_limiter.cleanup();
            }
        });
    }

    let public_routes = Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/panes/:pane_id/render", get(routes::render_pane))
        .route("/api/state", axum::routing::post(routes::update_state))
        .route("/api/sse/:storyfragment_id", get(routes::sse_stream))
        .layer(axum_mw::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .with_state(app_state.clone());

    let sysop_routes = Router::new()
        .route("/api/sysop/sessions", get(routes::list_all_session_ids))
        .route(
            "/api/sysop/fingerprints",
            get(routes::list_all_fingerprint_ids),
        )
        .route("/api/auth/me", get(auth_api::get_current_user))
        .route_layer(axum_mw::from_fn_with_state(
            jwt_handler.clone(),
            auth_middleware,
        ))
        .with_state(app_state.clone());

    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = Router::new()
        .merge(public_routes)
        .merge(sysop_routes)
        .merge(auth_router)
        .merge(metrics_router)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(
            tractcore::middleware::logging::request_logging_simple,
        ));

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "tractcore engine listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tractcore=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
