use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Scope requested when the provider and callback do not report one.
pub const DEFAULT_SCOPE: &str = "read,activity:read,activity:write";

/// Largest state expiry a `chrono::Duration` can hold.
const MAX_STATE_EXPIRY_SECONDS: i64 = i64::MAX / 1000;

/// Complete service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub strava: StravaConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Strava OAuth application settings
#[derive(Debug, Clone, Deserialize)]
pub struct StravaConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Absolute URL of the token endpoint
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Upper bound for one token endpoint request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_token_url() -> String {
    "https://www.strava.com/oauth/token".to_string()
}

fn default_auth_url() -> String {
    "https://www.strava.com/oauth/authorize".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/oauth/callback/strava".to_string()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for StravaConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: default_token_url(),
            auth_url: default_auth_url(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// HTTP listener and persistence settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_credentials_db")]
    pub credentials_db: String,
    /// How long an authorization attempt's state nonce stays valid
    #[serde(default = "default_state_expiry")]
    pub state_expiry_seconds: i64,
    #[serde(default = "default_state_cleanup_interval")]
    pub state_cleanup_interval_seconds: u64,
}

fn default_port() -> u16 {
    3000
}

fn default_credentials_db() -> String {
    "credentials.db".to_string()
}

fn default_state_expiry() -> i64 {
    600
}

fn default_state_cleanup_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            credentials_db: default_credentials_db(),
            state_expiry_seconds: default_state_expiry(),
            state_cleanup_interval_seconds: default_state_cleanup_interval(),
        }
    }
}

impl AppConfig {
    /// Applies `STRAVA_*` environment variables on top of the current values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = var("STRAVA_CLIENT_ID") {
            self.strava.client_id = v;
        }
        if let Some(v) = var("STRAVA_CLIENT_SECRET") {
            self.strava.client_secret = v;
        }
        if let Some(v) = var("STRAVA_TOKEN_URL") {
            self.strava.token_url = v;
        }
        if let Some(v) = var("STRAVA_AUTH_URL") {
            self.strava.auth_url = v;
        }
        if let Some(v) = var("STRAVA_REDIRECT_URI") {
            self.strava.redirect_uri = v;
        }
        if let Some(v) = var("STRAVA_SCOPE") {
            self.strava.scope = v;
        }
        if let Some(v) = var("STRAVA_REQUEST_TIMEOUT_SECS") {
            self.strava.request_timeout_secs = v
                .parse()
                .context("STRAVA_REQUEST_TIMEOUT_SECS must be a whole number of seconds")?;
        }
        if let Some(v) = var("STRAVA_AUTH_PORT") {
            self.server.port = v
                .parse()
                .context("STRAVA_AUTH_PORT must be a valid port number")?;
        }
        if let Some(v) = var("STRAVA_CREDENTIALS_DB") {
            self.server.credentials_db = v;
        }
        Ok(())
    }

    /// Rejects configurations the token endpoint would refuse or the service
    /// cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.strava.client_id.trim().is_empty() {
            bail!("Strava client id is not set (STRAVA_CLIENT_ID)");
        }
        if self.strava.client_secret.trim().is_empty() {
            bail!("Strava client secret is not set (STRAVA_CLIENT_SECRET)");
        }
        let token_url = self.strava.token_url.as_str();
        if !(token_url.starts_with("https://") || token_url.starts_with("http://")) {
            bail!("Strava token URL must be absolute, got {:?}", token_url);
        }
        if self.strava.request_timeout_secs == 0 {
            bail!("Request timeout must be at least one second");
        }
        if !(1..=MAX_STATE_EXPIRY_SECONDS).contains(&self.server.state_expiry_seconds) {
            bail!(
                "State expiry must be between 1 and {} seconds, got {}",
                MAX_STATE_EXPIRY_SECONDS,
                self.server.state_expiry_seconds
            );
        }
        if self.server.state_cleanup_interval_seconds == 0 {
            bail!("State cleanup interval must be at least one second");
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: AppConfig =
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path))?;
    Ok(config)
}
