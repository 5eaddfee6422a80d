use anyhow::{Context, Result};
use std::sync::Arc;
use strava_auth::api::{create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};
use strava_auth::config::{load_config, AppConfig};
use strava_auth::credentials::{SqliteTokenStore, TokenStore};
use strava_auth::lifecycle::TokenLifecycleManager;
use strava_auth::oauth::StravaAuthClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strava_auth=info".into()),
        )
        .init();

    info!("Strava auth service starting...");

    // File config is optional; environment always wins
    let mut config = match std::env::var("STRAVA_AUTH_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => AppConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let encryption_key = std::env::var("STRAVA_ENCRYPTION_KEY")
        .context("STRAVA_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    info!(
        token_url = %config.strava.token_url,
        credentials_db = %config.server.credentials_db,
        port = config.server.port,
        timeout_secs = config.strava.request_timeout_secs,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteTokenStore::new(&config.server.credentials_db, &encryption_key)
            .context("Failed to initialize credential store")?,
    );
    let athletes = store
        .list_athlete_ids()
        .context("Failed to list stored credentials")?;
    info!(athletes = athletes.len(), "Credential store initialized");

    let client = Arc::new(
        StravaAuthClient::new(&config.strava).context("Failed to build Strava client")?,
    );
    let manager = Arc::new(
        TokenLifecycleManager::new(store, client).with_default_scope(config.strava.scope.clone()),
    );

    let state_manager = StateManager::new(config.server.state_expiry_seconds)
        .context("Invalid OAuth state expiry")?;
    let cleanup_handle = tokio::spawn(run_state_cleanup(
        state_manager.clone(),
        config.server.state_cleanup_interval_seconds,
    ));

    let router = create_oauth_router(OAuthAppState {
        manager,
        state_manager,
        strava: config.strava.clone(),
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.server.port))
        .await
        .context("Failed to bind HTTP port")?;
    info!(port = config.server.port, "OAuth endpoints listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    cleanup_handle.abort();
    info!("Strava auth service stopped");

    Ok(())
}
