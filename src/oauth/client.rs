//! Token endpoint client.
//!
//! Performs the two grants Strava supports: authorization code and refresh
//! token. Each call is a single form-encoded POST; nothing is retried here.

use super::grant::{TokenGrant, TokenResponse};
use crate::config::StravaConfig;
use crate::error::GrantError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, warn};

/// The provider's token-granting operations.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// `grant_type=authorization_code`. The returned grant always carries an
    /// athlete id.
    async fn exchange_authorization_code(&self, code: &str) -> Result<TokenGrant, GrantError>;

    /// `grant_type=refresh_token`. The returned grant carries no athlete id.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, GrantError>;
}

/// [`AuthorizationClient`] talking to Strava's token endpoint over reqwest.
pub struct StravaAuthClient {
    http_client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaAuthClient {
    /// Builds a client whose requests time out after
    /// `config.request_timeout_secs`.
    pub fn new(config: &StravaConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    async fn post_grant(&self, grant_fields: &[(&str, &str)]) -> Result<TokenGrant, GrantError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant_fields);

        let response = self
            .http_client
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token endpoint rejected grant");
            return Err(GrantError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body)?;
        token_response.into_grant(Utc::now())
    }
}

#[async_trait]
impl AuthorizationClient for StravaAuthClient {
    async fn exchange_authorization_code(&self, code: &str) -> Result<TokenGrant, GrantError> {
        debug!(token_url = %self.token_url, "Exchanging authorization code");

        let grant = self
            .post_grant(&[("code", code), ("grant_type", "authorization_code")])
            .await?;

        if grant.athlete_id.is_none() {
            return Err(GrantError::MissingAccountIdentity);
        }

        debug!(
            athlete_id = ?grant.athlete_id,
            expires_at = %grant.expires_at,
            "Authorization code exchanged"
        );
        Ok(grant)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, GrantError> {
        debug!(token_url = %self.token_url, "Requesting refresh token grant");

        let grant = self
            .post_grant(&[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        debug!(expires_at = %grant.expires_at, "Refresh token grant succeeded");
        Ok(grant)
    }
}
