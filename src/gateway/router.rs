//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        DefaultBodyLimit, Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    middleware,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use super::auth::{
    MaybeSession, clear_session_cookie, require_workspace_session, safe_callback,
    session_cookie, session_middleware,
};
use super::evaluate::{EvaluateRequest, EvaluationGateway, authorize};
use crate::api::{ApiClient, Environment, FlagCatalog, Project};
use crate::config::{Config, SessionConfig};
use crate::engine::{EngineFactory, RelayEngineFactory};
use crate::oauth::{
    InMemorySessionStore, OAuthClient, PendingSignIns, SessionError, SessionStore, SessionToken,
    UserProfile, now_millis,
};
use crate::render::{RenderedFlag, render};
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Evaluation gateway (owns the management API client)
    pub gateway: EvaluationGateway,
    /// Identity provider client
    pub oauth: OAuthClient,
    /// Browser sessions
    pub sessions: Arc<dyn SessionStore>,
    /// Sign-in attempts awaiting the provider callback
    pub pending: PendingSignIns,
    /// Cookie settings
    pub session_config: SessionConfig,
}

impl AppState {
    /// Build state with an explicit engine and session store
    pub fn new(
        config: &Config,
        engine: Arc<dyn EngineFactory>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let http = http_client()?;
        let api = ApiClient::new(http.clone(), &config.api.base_url)?;
        let oauth = OAuthClient::from_config(http, &config.oauth)?;

        Ok(Self {
            gateway: EvaluationGateway::new(api, engine, config.engine.init_timeout),
            oauth,
            sessions,
            pending: PendingSignIns::new(config.session.sign_in_ttl),
            session_config: config.session.clone(),
        })
    }

    /// Build state with the HTTP evaluation engine and in-memory sessions
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = RelayEngineFactory::new(http_client()?, &config.engine.base_url)?;
        Self::new(
            config,
            Arc::new(engine),
            Arc::new(InMemorySessionStore::new()),
        )
    }

    fn api(&self) -> &ApiClient {
        self.gateway.api()
    }
}

/// Outbound HTTP client shared by the upstream clients
pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(concat!("context-tester/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Create the router
pub fn create_router(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/signin", get(sign_in_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/signout", get(sign_out_handler).post(sign_out_handler))
        .route("/api/session", get(session_handler))
        .route("/api/projects", get(projects_handler))
        .route("/api/projects/{project}/environments", get(environments_handler))
        .route("/api/projects/{project}/flags", get(flags_handler))
        .route("/api/evaluate", post(evaluate_handler))
        .route("/projects", get(first_project_handler))
        .route("/projects/{project}", get(first_environment_handler))
        .route(
            "/projects/{project}/environments/{environment}",
            get(workspace_handler),
        )
        .fallback(fallback_handler)
        // Guards every path under /projects, matched or not
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_workspace_session,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            session_middleware,
        ))
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.server.request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInQuery {
    callback_url: Option<String>,
}

/// GET /auth/signin
async fn sign_in_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SignInQuery>,
) -> Redirect {
    let callback = safe_callback(query.callback_url.as_deref());
    let sign_in_state = state.pending.begin(callback);
    Redirect::to(&state.oauth.authorization_url(&sign_in_state))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/callback
async fn callback_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<(CookieJar, Redirect)> {
    if let Some(error) = query.error {
        let message = query.error_description.unwrap_or(error);
        warn!(error = %message, "Identity provider refused sign-in");
        return Err(Error::BadRequest(format!("Sign-in failed: {message}")));
    }

    let callback = query
        .state
        .as_deref()
        .and_then(|s| state.pending.complete(s))
        .ok_or_else(|| Error::bad_request("Invalid or expired sign-in state"))?;
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| Error::bad_request("Missing authorization code"))?;

    let tokens = state.oauth.exchange_code(&code).await?;
    let mut session = SessionToken::from_grant(tokens, now_millis());

    let api = state.api();
    match tokio::try_join!(
        api.caller_identity(&session.access_token),
        api.current_member(&session.access_token)
    ) {
        Ok((identity, member)) => {
            session = session.with_profile(UserProfile::from_lookups(&identity, member));
        }
        Err(e) => warn!(error = %e, "Signed in without member profile"),
    }

    let id = state.sessions.create(session).await;
    info!("Session created");
    let cookie = session_cookie(
        &state.session_config.cookie_name,
        &id,
        state.session_config.secure_cookies,
    );
    Ok((jar.add(cookie), Redirect::to(&callback)))
}

/// GET|POST /auth/signout
async fn sign_out_handler(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    let name = &state.session_config.cookie_name;
    if let Some(cookie) = jar.get(name) {
        if state.sessions.remove(cookie.value()).await.is_some() {
            info!("Session signed out");
        }
    }
    (jar.remove(clear_session_cookie(name)), Redirect::to("/"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionInfo {
    profile: Option<UserProfile>,
    error: Option<SessionError>,
    access_token_expires_at: Option<u64>,
}

/// GET /api/session
async fn session_handler(session: MaybeSession) -> Result<Json<SessionInfo>> {
    let session = session.token().ok_or(Error::Unauthorized)?;
    Ok(Json(SessionInfo {
        profile: session.profile.clone(),
        error: session.last_error,
        access_token_expires_at: session.access_token_expires_at_millis,
    }))
}

/// GET /api/projects
async fn projects_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
) -> Result<Json<Vec<Project>>> {
    let token = authorize(session.token())?;
    Ok(Json(state.api().list_projects(token).await?))
}

/// GET /api/projects/{project}/environments
async fn environments_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    Path(project): Path<String>,
) -> Result<Json<Vec<Environment>>> {
    let token = authorize(session.token())?;
    Ok(Json(state.api().list_environments(token, &project).await?))
}

#[derive(Debug, Deserialize)]
struct FlagsQuery {
    env: Option<String>,
}

/// GET /api/projects/{project}/flags?env=
async fn flags_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    Path(project): Path<String>,
    Query(query): Query<FlagsQuery>,
) -> Result<Response> {
    let token = authorize(session.token())?;
    let env = query
        .env
        .filter(|env| !env.is_empty())
        .ok_or_else(|| Error::bad_request("Missing env parameter"))?;
    let flags = state.api().list_flags(token, &project, &env).await?;
    Ok(Json(flags).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct EvaluateQuery {
    #[serde(default)]
    render: bool,
}

/// POST /api/evaluate
///
/// The session is checked before the query and body are looked at, so a
/// signed-out browser gets 401 even for a malformed request.
async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    query: std::result::Result<Query<EvaluateQuery>, QueryRejection>,
    body: std::result::Result<Json<EvaluateRequest>, JsonRejection>,
) -> Result<Response> {
    let token = authorize(session.token())?;
    let Query(query) = query.map_err(|rejection| Error::BadRequest(rejection.body_text()))?;
    let Json(request) = body.map_err(|rejection| Error::BadRequest(rejection.body_text()))?;
    let project = request.project_key.clone().unwrap_or_default();
    let environment = request.environment_key.clone().unwrap_or_default();

    let flags = state.gateway.evaluate(session.token(), request).await?;
    if !query.render {
        return Ok(Json(flags).into_response());
    }

    let catalog = match state.api().list_flags(token, &project, &environment).await {
        Ok(flags) => Some(FlagCatalog::from_flags(flags)),
        Err(e) => {
            warn!(error = %e, "Rendering without flag metadata");
            None
        }
    };
    let rows: Vec<RenderedFlag> = render(&flags, catalog.as_ref());
    Ok(Json(rows).into_response())
}

/// GET /projects
async fn first_project_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
) -> Result<Response> {
    let token = authorize(session.token())?;
    let projects = state.api().list_projects(token).await?;
    Ok(match projects.first() {
        Some(project) => Redirect::to(&format!("/projects/{}", project.key)).into_response(),
        None => not_found("No projects available"),
    })
}

/// GET /projects/{project}
async fn first_environment_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    Path(project): Path<String>,
) -> Result<Response> {
    let token = authorize(session.token())?;
    let environments = state.api().list_environments(token, &project).await?;
    Ok(match environments.first() {
        Some(environment) => Redirect::to(&format!(
            "/projects/{project}/environments/{}",
            environment.key
        ))
        .into_response(),
        None => not_found("No environments available"),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Workspace {
    project_key: String,
    environment_key: String,
    projects: Vec<Project>,
    environments: Vec<Environment>,
}

/// GET /projects/{project}/environments/{environment}
async fn workspace_handler(
    State(state): State<Arc<AppState>>,
    session: MaybeSession,
    Path((project, environment)): Path<(String, String)>,
) -> Result<Json<Workspace>> {
    let token = authorize(session.token())?;
    let api = state.api();
    let (projects, environments) = tokio::try_join!(
        api.list_projects(token),
        api.list_environments(token, &project)
    )?;
    Ok(Json(Workspace {
        project_key: project,
        environment_key: environment,
        projects,
        environments,
    }))
}

async fn fallback_handler() -> Response {
    not_found("Not found")
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}
