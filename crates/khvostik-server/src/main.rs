mod cleanup;
mod config;

use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use khvostik_api::routes;
use khvostik_api::state::{AppState, AppStateInner};
use khvostik_api::storage::PhotoStore;
use khvostik_db::Database;
use khvostik_gateway::dispatcher::Dispatcher;
use khvostik_geocode::{AddressResolver, NominatimLookup, ResolverConfig};

use crate::config::Config;

/// How often spent password reset tokens are pruned.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "khvostik=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    if let Some(email) = config.admin_email.clone() {
        if db.promote_admin(&email)? {
            info!("Promoted {} to admin", email);
        }
    }

    let lookup = NominatimLookup::new(
        &config.geocoder_url,
        &config.geocoder_user_agent,
        config.geocoder_timeout,
        "ru",
    )?;
    let resolver = AddressResolver::new(
        Arc::new(lookup),
        ResolverConfig {
            region: config.region.clone(),
            country: config.country.clone(),
            ..Default::default()
        },
    );

    let photos = PhotoStore::new(config.media_dir.clone()).await?;

    tokio::spawn(cleanup::run_cleanup_loop(db.clone(), CLEANUP_INTERVAL));

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        dispatcher: Dispatcher::new(),
        resolver,
        photos,
        admin_email: config.admin_email.clone(),
        public_url: config.public_url.clone(),
    });

    let app = routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Khvostik server listening on {}", config.addr);
    info!("Geocoder: {}", config.geocoder_url);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
