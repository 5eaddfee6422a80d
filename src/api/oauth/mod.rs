//! OAuth 2.0 authorization flow for connecting a Strava athlete.
//!
//! 1. Browser hits GET /oauth/strava/authorize → redirect to Strava
//! 2. Athlete approves on strava.com
//! 3. Strava redirects to GET /oauth/callback/strava?code=..&scope=..&state=..
//! 4. The code is handed to the token lifecycle manager, which stores the credential

mod provider;
mod state_manager;

pub use provider::build_authorize_url;
pub use state_manager::{run_state_cleanup, PendingAuthorization, StateManager};

use crate::config::StravaConfig;
use crate::error::LifecycleError;
use crate::lifecycle::TokenLifecycleManager;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Application error types for OAuth endpoints
enum AppError {
    BadRequest(String),
    Unauthorized(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}

impl From<LifecycleError> for AppError {
    fn from(e: LifecycleError) -> Self {
        match &e {
            LifecycleError::ExchangeFailed(_) | LifecycleError::AccountIdentityMissing => {
                AppError::BadGateway(format!("Failed to exchange authorization code: {}", e))
            }
            LifecycleError::Store(_) => {
                AppError::ServerError(format!("Failed to store credentials: {}", e))
            }
            _ => AppError::ServerError(e.to_string()),
        }
    }
}

/// Shared application state for the OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub manager: Arc<TokenLifecycleManager>,
    pub state_manager: StateManager,
    pub strava: StravaConfig,
}

/// OAuth callback query parameters
#[derive(Deserialize)]
pub struct OAuthCallback {
    code: Option<String>,
    scope: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// OAuth success response. Never carries tokens.
#[derive(Serialize)]
pub struct OAuthSuccessResponse {
    success: bool,
    athlete_id: i64,
    message: String,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/oauth/strava/authorize", get(oauth_authorize))
        .route("/oauth/callback/strava", get(oauth_callback))
        .with_state(Arc::new(state))
}

/// GET /oauth/strava/authorize
///
/// Redirects to Strava's consent page with a fresh single-use state nonce.
async fn oauth_authorize(State(state): State<Arc<OAuthAppState>>) -> Redirect {
    let nonce = state.state_manager.issue(&state.strava.scope);
    let authorize_url = build_authorize_url(&state.strava, &nonce);

    info!(scope = %state.strava.scope, "Redirecting to Strava authorization");

    Redirect::temporary(&authorize_url)
}

/// GET /oauth/callback/strava
///
/// Validates the state nonce, then exchanges the code and stores the
/// credential.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<OAuthCallback>,
) -> Result<Response, AppError> {
    debug!("OAuth callback received");

    let nonce = callback
        .state
        .ok_or_else(|| AppError::BadRequest("Missing 'state' parameter".to_string()))?;

    // Validate state before anything else in the query
    let pending = state.state_manager.consume(&nonce).ok_or_else(|| {
        warn!("Invalid or expired OAuth state");
        AppError::Unauthorized("Invalid or expired OAuth state (possible CSRF attack)".to_string())
    })?;

    if let Some(error) = callback.error {
        warn!(error = %error, "Strava authorization denied");
        return Err(AppError::BadRequest(format!(
            "Strava authorization failed: {}",
            error
        )));
    }

    let code = callback
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'code' parameter".to_string()))?;

    if let Some(granted) = callback.scope.as_deref() {
        if granted != pending.requested_scope {
            info!(
                requested = %pending.requested_scope,
                granted = %granted,
                "Athlete granted a different scope than requested"
            );
        }
    }

    let credential = state
        .manager
        .exchange_code_with_scope(&code, callback.scope.as_deref())
        .await
        .map_err(|e| {
            error!(error = %e, "Authorization code exchange failed");
            AppError::from(e)
        })?;

    info!(
        athlete_id = credential.athlete_id,
        "Strava authorization completed"
    );

    Ok(Json(OAuthSuccessResponse {
        success: true,
        athlete_id: credential.athlete_id,
        message: format!("Connected Strava athlete {}", credential.athlete_id),
    })
    .into_response())
}
