//! Strava token endpoint access: grant requests and response parsing.

mod client;
mod grant;

pub use client::{AuthorizationClient, StravaAuthClient};
pub use grant::TokenGrant;
