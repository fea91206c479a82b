//! Session cookie handling and route protection
//!
//! [`session_middleware`] runs on every request: it reads the session cookie,
//! refreshes an expired access token through the store, and leaves the result
//! in the request extensions as a [`CurrentSession`]. Handlers pick it up with
//! the [`MaybeSession`] extractor.
//!
//! [`require_workspace_session`] guards the workspace pages. Browsers without
//! a usable session are sent to sign-in with the page they asked for as the
//! callback.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{Uri, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, info};

use super::router::AppState;
use crate::oauth::{SessionToken, now_millis, read_session};

/// Sign-in page
pub const SIGN_IN_PATH: &str = "/auth/signin";

/// Pages that need a signed-in session
pub const WORKSPACE_PREFIX: &str = "/projects";

/// Session attached to the current request
#[derive(Debug, Clone)]
pub struct CurrentSession {
    /// Opaque session ID from the cookie
    pub id: String,
    /// Tokens after any refresh performed for this request
    pub token: SessionToken,
}

/// Extracts the [`CurrentSession`], if the request carried a known session cookie
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<CurrentSession>);

impl MaybeSession {
    /// Tokens of the current session
    #[must_use]
    pub fn token(&self) -> Option<&SessionToken> {
        self.0.as_ref().map(|session| &session.token)
    }
}

impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<CurrentSession>().cloned()))
    }
}

/// Resolve the session cookie into a [`CurrentSession`]
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(&state.session_config.cookie_name) {
        let id = cookie.value().to_string();
        match read_session(state.sessions.as_ref(), &id, &state.oauth, now_millis()).await {
            Some(token) => {
                request
                    .extensions_mut()
                    .insert(CurrentSession { id, token });
            }
            None => debug!("Session cookie does not match a live session"),
        }
    }

    next.run(request).await
}

/// Redirect workspace pages to sign-in unless the request has a usable session.
///
/// Applies to every path under [`WORKSPACE_PREFIX`], whether or not a route
/// matches it; other paths pass through. A session whose refresh failed is
/// signed out here: it is dropped from the store and its cookie cleared.
pub async fn require_workspace_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    MaybeSession(session): MaybeSession,
    request: Request,
    next: Next,
) -> Response {
    if !is_workspace_path(request.uri().path()) {
        return next.run(request).await;
    }

    match session {
        Some(session) if session.token.is_usable() => next.run(request).await,
        Some(session) => {
            info!("Signing out session with unusable token");
            state.sessions.remove(&session.id).await;
            let jar = jar.remove(clear_session_cookie(&state.session_config.cookie_name));
            (jar, sign_in_redirect(request.uri())).into_response()
        }
        None => sign_in_redirect(request.uri()).into_response(),
    }
}

/// True for `/projects` and anything below it
#[must_use]
pub fn is_workspace_path(path: &str) -> bool {
    path.strip_prefix(WORKSPACE_PREFIX)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `/auth/signin?callbackUrl=<path and query of uri>`
pub fn sign_in_redirect(uri: &Uri) -> Redirect {
    let callback = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |pq| pq.as_str());
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("callbackUrl", callback)
        .finish();
    Redirect::to(&format!("{SIGN_IN_PATH}?{query}"))
}

/// Only same-origin paths are followed after sign-in
#[must_use]
pub fn safe_callback(callback: Option<&str>) -> String {
    match callback {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => "/".to_string(),
    }
}

/// Session cookie for a freshly created session
pub fn session_cookie(name: &str, session_id: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), session_id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Cookie that removes the session cookie
pub fn clear_session_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), "")).path("/").build()
}
