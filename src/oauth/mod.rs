//! OAuth 2.0 sign-in and token lifecycle
//!
//! Implements the authorization code flow against the identity provider and
//! keeps each browser session's tokens fresh:
//!
//! - Authorization URL with a random `state` bound to the sign-in attempt
//! - Code exchange and refresh-token exchange at the token endpoint
//! - In-memory session store keyed by an opaque cookie value
//! - Refresh on read once the stored expiry has passed
//!
//! Refreshes are not deduplicated: two reads that both observe an expired
//! token both hit the token endpoint, and the last response wins.

mod client;
mod session;
mod store;

pub use client::{OAuthClient, TokenResponse};
pub use session::{SessionError, SessionToken, UserProfile, now_millis, refresh_if_expired};
pub use store::{InMemorySessionStore, PendingSignIns, SessionStore, read_session};
