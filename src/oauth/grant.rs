//! Parsing of the token endpoint's grant response.

use crate::error::GrantError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;

/// Grant response as sent by Strava.
///
/// Every field is optional on the wire so a missing value surfaces as a typed
/// [`GrantError`] instead of a generic parse failure.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token_type: Option<String>,
    /// Absolute expiry, epoch seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    /// Relative expiry, seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Only present on the authorization-code grant
    #[serde(default)]
    pub athlete: Option<AthleteSummary>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AthleteSummary {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub firstname: Option<String>,
    #[serde(default)]
    pub lastname: Option<String>,
}

/// Validated result of a grant call. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// Informational only; `expires_at` is authoritative
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    /// Scope as reported by the provider, if it reported one
    pub scope: Option<String>,
    /// Athlete identity, carried by the authorization-code grant only
    pub athlete_id: Option<i64>,
    pub athlete_name: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TokenResponse {
    /// Validates the response. `now` anchors `expires_in` when the provider
    /// leaves out `expires_at`.
    pub fn into_grant(self, now: DateTime<Utc>) -> Result<TokenGrant, GrantError> {
        let access_token = non_empty(self.access_token).ok_or(GrantError::MissingAccessToken)?;
        let refresh_token =
            non_empty(self.refresh_token).ok_or(GrantError::MissingRefreshToken)?;

        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(epoch), _) => Utc.timestamp_opt(epoch, 0).single().ok_or(
                GrantError::InvalidExpiry {
                    field: "expires_at",
                    value: epoch,
                },
            )?,
            (None, Some(secs)) => Duration::try_seconds(secs)
                .and_then(|d| now.checked_add_signed(d))
                .and_then(|at| Utc.timestamp_opt(at.timestamp(), 0).single())
                .ok_or(GrantError::InvalidExpiry {
                    field: "expires_in",
                    value: secs,
                })?,
            (None, None) => return Err(GrantError::MissingExpiry),
        };

        let (athlete_id, athlete_name) = match self.athlete {
            Some(athlete) => {
                let name = [athlete.firstname, athlete.lastname]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                (athlete.id, Some(name).filter(|n| !n.is_empty()))
            }
            None => (None, None),
        };

        Ok(TokenGrant {
            access_token,
            refresh_token,
            expires_at,
            expires_in: self.expires_in,
            token_type: self.token_type,
            scope: non_empty(self.scope),
            athlete_id,
            athlete_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_authorization_code_response() {
        let json = r#"{
            "token_type": "Bearer",
            "expires_at": 1714586400,
            "expires_in": 21600,
            "refresh_token": "e5n567567",
            "access_token": "a4b945687g",
            "athlete": { "id": 134815, "firstname": "Marianne", "lastname": "Teutenberg" }
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let grant = response.into_grant(now()).unwrap();

        assert_eq!(grant.access_token, "a4b945687g");
        assert_eq!(grant.refresh_token, "e5n567567");
        assert_eq!(grant.expires_at.timestamp(), 1714586400);
        assert_eq!(grant.expires_in, Some(21600));
        assert_eq!(grant.token_type.as_deref(), Some("Bearer"));
        assert_eq!(grant.athlete_id, Some(134815));
        assert_eq!(grant.athlete_name.as_deref(), Some("Marianne Teutenberg"));
        assert_eq!(grant.scope, None);
    }

    #[test]
    fn test_refresh_response_has_no_athlete() {
        let json = r#"{
            "token_type": "Bearer",
            "access_token": "a9b723",
            "expires_at": 1714586400,
            "expires_in": 20566,
            "refresh_token": "b5c569"
        }"#;

        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let grant = response.into_grant(now()).unwrap();
        assert_eq!(grant.athlete_id, None);
        assert_eq!(grant.athlete_name, None);
    }

    #[test]
    fn test_expires_in_fallback() {
        let response = TokenResponse {
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            expires_in: Some(3600),
            ..Default::default()
        };
        let grant = response.into_grant(now()).unwrap();
        assert_eq!(grant.expires_at, now() + Duration::seconds(3600));
    }

    #[test]
    fn test_missing_fields() {
        let missing_access = TokenResponse {
            refresh_token: Some("rt".into()),
            expires_at: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            missing_access.into_grant(now()),
            Err(GrantError::MissingAccessToken)
        ));

        let blank_refresh = TokenResponse {
            access_token: Some("at".into()),
            refresh_token: Some("  ".into()),
            expires_at: Some(1),
            ..Default::default()
        };
        assert!(matches!(
            blank_refresh.into_grant(now()),
            Err(GrantError::MissingRefreshToken)
        ));

        let no_expiry = TokenResponse {
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            ..Default::default()
        };
        assert!(matches!(
            no_expiry.into_grant(now()),
            Err(GrantError::MissingExpiry)
        ));
    }

    #[test]
    fn test_unrepresentable_expiry() {
        let far_future = TokenResponse {
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            expires_at: Some(i64::MAX),
            ..Default::default()
        };
        let err = far_future.into_grant(now()).unwrap_err();
        assert!(matches!(
            err,
            GrantError::InvalidExpiry {
                field: "expires_at",
                value: i64::MAX
            }
        ));
        assert!(err.to_string().contains("9223372036854775807"));

        let huge_lifetime = TokenResponse {
            access_token: Some("at".into()),
            refresh_token: Some("rt".into()),
            expires_in: Some(i64::MAX),
            ..Default::default()
        };
        assert!(matches!(
            huge_lifetime.into_grant(now()),
            Err(GrantError::InvalidExpiry {
                field: "expires_in",
                ..
            })
        ));
    }

    #[test]
    fn test_athlete_without_id() {
        let json = r#"{
            "access_token": "at", "refresh_token": "rt", "expires_at": 1714586400,
            "athlete": { "firstname": "Anon" }
        }"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        let grant = response.into_grant(now()).unwrap();
        assert_eq!(grant.athlete_id, None);
        assert_eq!(grant.athlete_name.as_deref(), Some("Anon"));
    }
}
