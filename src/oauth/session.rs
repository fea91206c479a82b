//! Session token and refresh procedure
//!
//! The refresh procedure takes a session by value and returns the session the
//! caller must treat as current. Nothing is mutated in place.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::client::{OAuthClient, TokenResponse};
use crate::api::{CallerIdentity, Member};

/// Error recorded on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionError {
    /// The last refresh-token exchange failed; the session must be signed out
    #[serde(rename = "RefreshAccessTokenError")]
    RefreshFailed,
}

/// Signed-in member profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Member ID
    pub id: String,
    /// Display name (`first last`)
    pub name: String,
    /// Email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Member role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Account the member belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl UserProfile {
    /// Combine the caller identity and member lookups
    #[must_use]
    pub fn from_lookups(identity: &CallerIdentity, member: Member) -> Self {
        let name = [member.first_name.as_deref(), member.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            id: member.id,
            name,
            email: member.email,
            role: member.role,
            account_id: identity.account_id.clone(),
        }
    }
}

/// Tokens held for one browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Current access token
    pub access_token: String,
    /// Refresh token, if the provider issued one
    pub refresh_token: Option<String>,
    /// Absolute expiry of the access token (epoch millis); `None` never expires
    pub access_token_expires_at_millis: Option<u64>,
    /// Error recorded by the last refresh attempt
    pub last_error: Option<SessionError>,
    /// Profile captured at sign-in
    pub profile: Option<UserProfile>,
}

impl SessionToken {
    /// Session created from a successful authorization code exchange
    #[must_use]
    pub fn from_grant(tokens: TokenResponse, now_ms: u64) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            access_token_expires_at_millis: tokens.expires_in.map(|secs| expiry(now_ms, secs)),
            last_error: None,
            profile: None,
        }
    }

    /// Attach the signed-in profile
    #[must_use]
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// True once `now_ms` has reached the recorded expiry
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.access_token_expires_at_millis
            .is_some_and(|expires_at| now_ms >= expires_at)
    }

    /// True if the session may be used to call upstream APIs
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty() && self.last_error.is_none()
    }

    /// Apply a refresh response. The old refresh token is kept unless a new one was issued.
    #[must_use]
    pub fn refreshed(self, tokens: TokenResponse, now_ms: u64) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token.or(self.refresh_token),
            access_token_expires_at_millis: tokens.expires_in.map(|secs| expiry(now_ms, secs)),
            last_error: None,
            profile: self.profile,
        }
    }

    /// Mark the session as failed, keeping the stale tokens and expiry
    #[must_use]
    pub fn failed(mut self, error: SessionError) -> Self {
        self.last_error = Some(error);
        self
    }
}

fn expiry(now_ms: u64, expires_in_secs: u64) -> u64 {
    now_ms.saturating_add(expires_in_secs.saturating_mul(1000))
}

/// Current wall-clock time in epoch milliseconds
#[must_use]
pub fn now_millis() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO);
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Refresh the session's access token if it has expired.
///
/// Returns the session unchanged when it has not expired, has no expiry, or
/// has no refresh token. On a failed exchange the returned session carries
/// [`SessionError::RefreshFailed`] and the stale access token; its expiry is
/// not advanced, so the next read tries again.
pub async fn refresh_if_expired(
    session: SessionToken,
    oauth: &OAuthClient,
    now_ms: u64,
) -> SessionToken {
    if !session.is_expired(now_ms) {
        return session;
    }
    let Some(refresh_token) = session.refresh_token.clone() else {
        debug!("Access token expired and no refresh token is available");
        return session;
    };

    match oauth.refresh(&refresh_token).await {
        Ok(tokens) => session.refreshed(tokens, now_ms),
        Err(e) => {
            warn!(error = %e, "Error refreshing access token");
            session.failed(SessionError::RefreshFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in: Option<u64>, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: "access-1".into(),
            token_type: Some("Bearer".into()),
            expires_in,
            refresh_token: refresh.map(str::to_string),
            scope: None,
        }
    }

    #[test]
    fn grant_computes_absolute_expiry() {
        let session = SessionToken::from_grant(grant(Some(3600), Some("r-1")), 1_000);
        assert_eq!(session.access_token_expires_at_millis, Some(3_601_000));
        assert!(!session.is_expired(3_600_999));
        assert!(session.is_expired(3_601_000));
    }

    #[test]
    fn missing_expiry_never_expires() {
        let session = SessionToken::from_grant(grant(None, Some("r-1")), 0);
        assert!(!session.is_expired(u64::MAX));
    }

    #[test]
    fn refresh_keeps_old_refresh_token_when_not_rotated() {
        let session = SessionToken::from_grant(grant(Some(60), Some("r-1")), 0);
        let mut next = grant(Some(120), None);
        next.access_token = "access-2".into();

        let refreshed = session.refreshed(next, 100_000);
        assert_eq!(refreshed.access_token, "access-2");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r-1"));
        assert_eq!(refreshed.access_token_expires_at_millis, Some(220_000));
    }

    #[test]
    fn refresh_clears_previous_error() {
        let session =
            SessionToken::from_grant(grant(Some(60), Some("r-1")), 0).failed(SessionError::RefreshFailed);
        assert!(!session.is_usable());
        let refreshed = session.refreshed(grant(Some(60), Some("r-2")), 0);
        assert_eq!(refreshed.last_error, None);
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r-2"));
        assert!(refreshed.is_usable());
    }

    #[test]
    fn failure_keeps_stale_token_and_expiry() {
        let session = SessionToken::from_grant(grant(Some(60), Some("r-1")), 0);
        let failed = session.clone().failed(SessionError::RefreshFailed);
        assert_eq!(failed.access_token, session.access_token);
        assert_eq!(
            failed.access_token_expires_at_millis,
            session.access_token_expires_at_millis
        );
        assert_eq!(failed.last_error, Some(SessionError::RefreshFailed));
    }

    #[test]
    fn profile_name_joins_present_parts() {
        let member = Member {
            id: "m-1".into(),
            first_name: Some("Ada".into()),
            last_name: None,
            email: Some("ada@example.com".into()),
            role: Some("admin".into()),
        };
        let identity = CallerIdentity {
            account_id: Some("acct-9".into()),
            ..CallerIdentity::default()
        };
        let profile = UserProfile::from_lookups(&identity, member);
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.account_id.as_deref(), Some("acct-9"));
    }

    #[test]
    fn session_error_uses_wire_name() {
        assert_eq!(
            serde_json::to_value(SessionError::RefreshFailed).unwrap(),
            serde_json::json!("RefreshAccessTokenError")
        );
    }
}
