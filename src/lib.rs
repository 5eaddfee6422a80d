//! Strava OAuth2 credential management.
//!
//! Exchanges authorization codes for tokens, keeps exactly one credential per
//! athlete, and refreshes the access token lazily before it is handed out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strava_auth::config::AppConfig;
//! use strava_auth::credentials::MemoryTokenStore;
//! use strava_auth::lifecycle::TokenLifecycleManager;
//! use strava_auth::oauth::StravaAuthClient;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut config = AppConfig::default();
//! config.apply_env()?;
//! config.validate()?;
//!
//! let manager = TokenLifecycleManager::new(
//!     Arc::new(MemoryTokenStore::new()),
//!     Arc::new(StravaAuthClient::new(&config.strava)?),
//! );
//!
//! let credential = manager.exchange_code("code-from-callback").await?;
//! let token = manager.get_valid_access_token(credential.athlete_id).await?;
//! # let _ = token;
//! # Ok(())
//! # }
//! ```

// Service configuration
pub mod config;

// Typed errors
pub mod error;

// Credential persistence
pub mod credentials;

// Token endpoint client
pub mod oauth;

// Exchange, expiry and refresh orchestration
pub mod lifecycle;

// Authorization redirect and callback endpoints
pub mod api;
