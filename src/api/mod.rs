// Inbound HTTP surface: the Strava authorization redirect and callback

pub mod oauth;

pub use oauth::{create_oauth_router, run_state_cleanup, OAuthAppState, StateManager};
