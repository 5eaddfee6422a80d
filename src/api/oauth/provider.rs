//! Strava authorization endpoint URL.

use crate::config::StravaConfig;

/// Builds the URL the athlete's browser is sent to for consent.
///
/// Strava expects comma-separated scopes, so the scope string is passed as is
/// and only percent-encoded.
pub fn build_authorize_url(config: &StravaConfig, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&approval_prompt=auto&scope={}&state={}",
        config.auth_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&config.scope),
        urlencoding::encode(state)
    )
}
