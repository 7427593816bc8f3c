// Gatehouse demo server
// Decision: Configuration is environment-only (dotenv supported); no config files

mod config;
mod routes;

use anyhow::{Context, Result};
use config::ServerConfig;
use gatehouse_auth::provider::presets;
use gatehouse_auth::{AuthService, DevAuthServer, MokaRefreshCache, StaticSecret};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default filter
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gatehouse_auth=debug,gatehouse_server=debug,tower_http=debug"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(filter)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatehouse starting...");

    let config = ServerConfig::from_env()?;

    let mut builder = AuthService::builder(config.auth.clone())
        .secret_reader(StaticSecret::new(config.secret.clone()))
        .refresh_cache(MokaRefreshCache::with_ttl(config.refresh_cache_ttl));

    for creds in &config.providers {
        if let Some(provider) = presets::by_name(&creds.name, &creds.client_id, &creds.client_secret)
        {
            tracing::info!(provider = %creds.name, "provider enabled");
            builder = builder.provider(provider);
        }
    }

    // Keep the handle alive for the lifetime of the server
    let _dev_server = match &config.dev_provider {
        Some(addr) => {
            let (local, handle) = DevAuthServer::new()
                .spawn(addr)
                .await
                .context("Failed to start dev oauth2 server")?;
            builder = builder.provider(presets::dev(&format!("http://{local}")));
            tracing::warn!(addr = %local, "dev provider enabled, do not use in production");
            Some(handle)
        }
        None => None,
    };

    let auth = builder.build().context("Failed to build auth service")?;
    if auth.registry().is_empty() {
        tracing::warn!("no providers configured, only basic auth is available");
    }

    let app = routes::build_router(&auth).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
