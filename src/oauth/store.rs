//! Session store: in-memory persistence for browser sessions.
//!
//! The [`SessionStore`] trait abstracts over storage backends. The only
//! implementation is [`InMemorySessionStore`], a `DashMap` keyed by the opaque
//! session identifier carried in the session cookie. Sessions do not survive a
//! restart.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use super::client::{OAuthClient, generate_session_id, generate_state};
use super::session::{SessionToken, refresh_if_expired};

/// Storage backend for session tokens.
///
/// Implementations must be `Send + Sync`; the store is shared across request tasks.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Store a new session and return its identifier.
    async fn create(&self, session: SessionToken) -> String;

    /// Current value of a session.
    async fn get(&self, id: &str) -> Option<SessionToken>;

    /// Replace an existing session. Returns `false` if it was removed meanwhile.
    async fn replace(&self, id: &str, session: SessionToken) -> bool;

    /// Drop a session (sign-out).
    async fn remove(&self, id: &str) -> Option<SessionToken>;
}

/// In-memory session store backed by a `DashMap`.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, SessionToken>,
}

impl InMemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True if no session is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: SessionToken) -> String {
        let id = generate_session_id();
        self.sessions.insert(id.clone(), session);
        debug!(sessions = self.sessions.len(), "Session created");
        id
    }

    async fn get(&self, id: &str) -> Option<SessionToken> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    async fn replace(&self, id: &str, session: SessionToken) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut entry) => {
                *entry = session;
                true
            }
            None => false,
        }
    }

    async fn remove(&self, id: &str) -> Option<SessionToken> {
        self.sessions.remove(id).map(|(_, session)| session)
    }
}

/// Read a session, refreshing its access token first if it has expired.
///
/// The refreshed value is written back unless the session was signed out
/// while the refresh was in flight. No map guard is held across the token
/// request.
pub async fn read_session(
    store: &dyn SessionStore,
    id: &str,
    oauth: &OAuthClient,
    now_ms: u64,
) -> Option<SessionToken> {
    let current = store.get(id).await?;
    if !current.is_expired(now_ms) || current.refresh_token.is_none() {
        return Some(current);
    }

    let next = refresh_if_expired(current, oauth, now_ms).await;
    if store.replace(id, next.clone()).await {
        Some(next)
    } else {
        debug!("Session removed during refresh");
        None
    }
}

/// A sign-in attempt waiting for the provider's callback
#[derive(Debug, Clone)]
struct PendingSignIn {
    callback_url: String,
    started: Instant,
}

/// Outstanding `state` values handed to the authorization endpoint.
pub struct PendingSignIns {
    pending: DashMap<String, PendingSignIn>,
    ttl: Duration,
}

impl PendingSignIns {
    /// Create a registry whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Remember where to send the browser after sign-in; returns the `state` value.
    pub fn begin(&self, callback_url: impl Into<String>) -> String {
        self.reap_expired();
        let state = generate_state();
        self.pending.insert(
            state.clone(),
            PendingSignIn {
                callback_url: callback_url.into(),
                started: Instant::now(),
            },
        );
        state
    }

    /// Consume a `state` value. Returns the callback URL if it was issued here and has not expired.
    pub fn complete(&self, state: &str) -> Option<String> {
        let (_, pending) = self.pending.remove(state)?;
        if pending.started.elapsed() > self.ttl {
            debug!("Sign-in state expired");
            return None;
        }
        Some(pending.callback_url)
    }

    /// Drop expired attempts. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.started.elapsed() <= self.ttl);
        before - self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(token: &str) -> SessionToken {
        SessionToken {
            access_token: token.to_string(),
            refresh_token: None,
            access_token_expires_at_millis: None,
            last_error: None,
            profile: None,
        }
    }

    #[tokio::test]
    async fn create_get_remove() {
        let store = InMemorySessionStore::new();
        let id = store.create(session("a")).await;
        assert_eq!(store.get(&id).await.unwrap().access_token, "a");
        assert_eq!(store.len(), 1);

        assert!(store.remove(&id).await.is_some());
        assert!(store.get(&id).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn replace_does_not_resurrect_removed_session() {
        let store = InMemorySessionStore::new();
        let id = store.create(session("a")).await;
        assert!(store.replace(&id, session("b")).await);
        assert_eq!(store.get(&id).await.unwrap().access_token, "b");

        store.remove(&id).await;
        assert!(!store.replace(&id, session("c")).await);
        assert!(store.get(&id).await.is_none());
    }

    #[test]
    fn pending_sign_in_is_single_use() {
        let pending = PendingSignIns::new(Duration::from_secs(60));
        let state = pending.begin("/projects/demo");
        assert_eq!(pending.complete(&state).as_deref(), Some("/projects/demo"));
        assert!(pending.complete(&state).is_none());
        assert!(pending.complete("forged").is_none());
    }

    #[test]
    fn pending_sign_in_expires() {
        let pending = PendingSignIns::new(Duration::ZERO);
        let state = pending.begin("/");
        std::thread::sleep(Duration::from_millis(5));
        assert!(pending.complete(&state).is_none());
    }

    #[test]
    fn reap_removes_only_expired() {
        let fresh = PendingSignIns::new(Duration::from_secs(60));
        fresh.begin("/a");
        fresh.begin("/b");
        assert_eq!(fresh.reap_expired(), 0);

        let stale = PendingSignIns::new(Duration::ZERO);
        stale.begin("/a");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(stale.reap_expired(), 1);
    }
}
