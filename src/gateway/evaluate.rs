//! Authenticated evaluation
//!
//! Order of checks matters: the session is checked before the body, and both
//! before any outbound call.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::api::ApiClient;
use crate::engine::{self, EngineFactory};
use crate::flags::FlagsState;
use crate::oauth::SessionToken;
use crate::{Error, Result};

/// Context kind assumed when the caller leaves `kind` out
pub const DEFAULT_CONTEXT_KIND: &str = "user";

/// Body of `POST /api/evaluate`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Project key
    #[serde(default)]
    pub project_key: Option<String>,
    /// Environment key
    #[serde(default)]
    pub environment_key: Option<String>,
    /// Evaluation context
    #[serde(default)]
    pub context: Option<Value>,
}

/// Validated evaluation input
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationTarget {
    /// Project key
    pub project_key: String,
    /// Environment key
    pub environment_key: String,
    /// Context with `kind` filled in
    pub context: Value,
}

impl EvaluateRequest {
    /// Check that all three inputs are present and the context is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BadRequest`] naming what is missing or malformed.
    pub fn validate(self) -> Result<EvaluationTarget> {
        let project_key = self.project_key.filter(|k| !k.is_empty());
        let environment_key = self.environment_key.filter(|k| !k.is_empty());
        let context = self.context.filter(|c| !c.is_null());

        let (Some(project_key), Some(environment_key), Some(context)) =
            (project_key, environment_key, context)
        else {
            return Err(Error::bad_request("Missing required parameters"));
        };

        Ok(EvaluationTarget {
            project_key,
            environment_key,
            context: normalize_context(context)?,
        })
    }
}

/// Fill in the default `kind` and require a `key` on single-kind contexts.
fn normalize_context(context: Value) -> Result<Value> {
    let Value::Object(mut object) = context else {
        return Err(Error::bad_request("Context must be a JSON object"));
    };

    let kind = match object.get("kind") {
        None => {
            object.insert("kind".into(), Value::String(DEFAULT_CONTEXT_KIND.into()));
            DEFAULT_CONTEXT_KIND.to_string()
        }
        Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
        Some(_) => return Err(Error::bad_request("Context kind must be a non-empty string")),
    };

    if kind != "multi" && !has_key(&object) {
        return Err(Error::bad_request("Context key must be a non-empty string"));
    }

    Ok(Value::Object(object))
}

fn has_key(object: &Map<String, Value>) -> bool {
    matches!(object.get("key"), Some(Value::String(key)) if !key.is_empty())
}

/// Access token of a session that may call upstream APIs.
///
/// # Errors
///
/// Returns [`Error::Unauthorized`] if there is no session, the access token is
/// empty, or the last refresh failed.
pub fn authorize(session: Option<&SessionToken>) -> Result<&str> {
    match session {
        Some(session) if session.is_usable() => Ok(session.access_token.as_str()),
        _ => Err(Error::Unauthorized),
    }
}

/// Resolves environment credentials and runs evaluations
pub struct EvaluationGateway {
    api: ApiClient,
    engine: Arc<dyn EngineFactory>,
    init_timeout: Duration,
}

impl EvaluationGateway {
    /// Create a gateway over the management API and an engine factory
    pub fn new(api: ApiClient, engine: Arc<dyn EngineFactory>, init_timeout: Duration) -> Self {
        Self {
            api,
            engine,
            init_timeout,
        }
    }

    /// Management API client used for credential lookups
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Evaluate a request on behalf of a session.
    pub async fn evaluate(
        &self,
        session: Option<&SessionToken>,
        request: EvaluateRequest,
    ) -> Result<FlagsState> {
        let access_token = authorize(session)?;
        let target = request.validate()?;
        self.evaluate_target(access_token, &target).await
    }

    /// Evaluate already validated input.
    ///
    /// An empty access token is refused with [`Error::Unauthorized`] before
    /// any upstream call.
    pub async fn evaluate_target(
        &self,
        access_token: &str,
        target: &EvaluationTarget,
    ) -> Result<FlagsState> {
        if access_token.trim().is_empty() {
            return Err(Error::Unauthorized);
        }

        let environment = self
            .api
            .get_environment(access_token, &target.project_key, &target.environment_key)
            .await?;

        let credential = environment
            .api_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| Error::MissingCredential {
                project: target.project_key.clone(),
                environment: target.environment_key.clone(),
            })?;

        info!(
            project = %target.project_key,
            environment = %target.environment_key,
            "Evaluating context"
        );
        let state = engine::evaluate_scoped(
            self.engine.as_ref(),
            &credential,
            &target.context,
            self.init_timeout,
        )
        .await?;
        info!(flags = state.len(), valid = state.is_valid(), "Evaluation complete");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(value: Value) -> EvaluateRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn validate_accepts_complete_request() {
        let target = request(json!({
            "projectKey": "default",
            "environmentKey": "production",
            "context": {"kind": "user", "key": "u-1"}
        }))
        .validate()
        .unwrap();
        assert_eq!(target.project_key, "default");
        assert_eq!(target.context, json!({"kind": "user", "key": "u-1"}));
    }

    #[test]
    fn validate_defaults_kind_to_user() {
        let target = request(json!({
            "projectKey": "p",
            "environmentKey": "e",
            "context": {"key": "u-1", "name": "Ada"}
        }))
        .validate()
        .unwrap();
        assert_eq!(target.context["kind"], json!("user"));
        assert_eq!(target.context["name"], json!("Ada"));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        for body in [
            json!({"environmentKey": "e", "context": {"key": "k"}}),
            json!({"projectKey": "p", "context": {"key": "k"}}),
            json!({"projectKey": "p", "environmentKey": "e"}),
            json!({"projectKey": "", "environmentKey": "e", "context": {"key": "k"}}),
            json!({"projectKey": "p", "environmentKey": "e", "context": null}),
        ] {
            let err = request(body).validate().unwrap_err();
            assert!(matches!(err, Error::BadRequest(ref m) if m == "Missing required parameters"));
        }
    }

    #[test]
    fn validate_rejects_non_object_context() {
        let err = request(json!({"projectKey": "p", "environmentKey": "e", "context": "user-1"}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn multi_context_needs_no_top_level_key() {
        let target = request(json!({
            "projectKey": "p",
            "environmentKey": "e",
            "context": {"kind": "multi", "user": {"key": "u"}, "org": {"key": "o"}}
        }))
        .validate()
        .unwrap();
        assert_eq!(target.context["kind"], json!("multi"));

        let err = request(json!({"projectKey": "p", "environmentKey": "e", "context": {"kind": "device"}}))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[test]
    fn authorize_requires_usable_session() {
        assert!(matches!(authorize(None), Err(Error::Unauthorized)));

        let mut session = SessionToken {
            access_token: String::new(),
            refresh_token: None,
            access_token_expires_at_millis: None,
            last_error: None,
            profile: None,
        };
        assert!(matches!(authorize(Some(&session)), Err(Error::Unauthorized)));

        session.access_token = "tok".into();
        assert_eq!(authorize(Some(&session)).unwrap(), "tok");

        session.last_error = Some(crate::oauth::SessionError::RefreshFailed);
        assert!(matches!(authorize(Some(&session)), Err(Error::Unauthorized)));
    }

    #[tokio::test]
    async fn empty_access_token_never_reaches_upstream() {
        use wiremock::matchers::any;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let http = reqwest::Client::new();
        let api = ApiClient::new(http.clone(), &server.uri()).unwrap();
        let engine = crate::engine::RelayEngineFactory::new(http, &server.uri()).unwrap();
        let gateway = EvaluationGateway::new(api, Arc::new(engine), Duration::from_secs(1));
        let target = request(json!({"projectKey": "p", "environmentKey": "e", "context": {"key": "k"}}))
            .validate()
            .unwrap();

        for token in ["", "  "] {
            let err = gateway.evaluate_target(token, &target).await.unwrap_err();
            assert!(matches!(err, Error::Unauthorized));
        }
    }
}
