use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use rail_server::audit::{AuditLogger, AuditSink};
use rail_server::auth::{JwksSource, KeyCache, TokenValidator};
use rail_server::config::Settings;
use rail_server::limit::RateLimiter;
use rail_server::store::{PgStore, ReferenceStore};
use rail_server::upstream::{
    CacheConfig, CachedNavitiaClient, CachedOpenDataClient, NavitiaClient, OpenDataClient,
};
use rail_server::web::{AppState, Gate, create_router};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "rail_server=info,tower_http=info";

/// Timeout for fetching the signing key set.
const JWKS_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    let settings = Settings::from_env().context("invalid configuration")?;

    // The database may come up after us; audit writes and reference lookups
    // fail individually until it does.
    let store = Arc::new(PgStore::connect_lazy(&settings.database_url).context("invalid DATABASE_URL")?);
    match store.migrate().await {
        Ok(()) => info!("database schema up to date"),
        Err(e) => error!(error = %e, "database migration failed, continuing without it"),
    }

    let source = JwksSource::new(settings.jwks_url.clone(), JWKS_TIMEOUT)
        .context("failed to build JWKS client")?;
    let keys = Arc::new(
        KeyCache::new(Arc::new(source)).with_min_refresh_interval(settings.jwks_min_refresh),
    );
    let validator = Arc::new(TokenValidator::new(&settings.validator, keys));
    let limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));

    let audit_sink: Arc<dyn AuditSink> = store.clone();
    let audit = AuditLogger::spawn(audit_sink, &settings.audit);

    let cache_config = CacheConfig::default();
    let opendata = CachedOpenDataClient::new(
        OpenDataClient::new(settings.opendata.clone()).context("failed to build open data client")?,
        &cache_config,
    );
    let navitia = CachedNavitiaClient::new(
        NavitiaClient::new(settings.navitia.clone()).context("failed to build Navitia client")?,
        &cache_config,
    );
    if settings.navitia.api_key.is_none() {
        warn!("NAVITIA_API_KEY not set, real-time requests will likely be refused");
    }

    let reference: Arc<dyn ReferenceStore> = store;
    let gate = Gate::new(validator, limiter, audit.clone());
    let app = create_router(AppState::new(gate, reference, opendata, navitia));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    info!(
        addr = %settings.bind_addr,
        issuer = %settings.validator.issuer,
        rate_limit = settings.rate_limit.limit,
        "rail API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    audit.flush().await;
    info!(dropped = audit.dropped(), "audit queue flushed, shutting down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
