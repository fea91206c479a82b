//! OAuth Client
//!
//! Talks to the identity provider's authorization and token endpoints using
//! a confidential client registration (client ID + secret).

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::OAuthConfig;
use crate::{Error, Result};

/// OAuth client for the identity provider
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// HTTP client for token requests
    http_client: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    authorize_url: Url,
    token_url: Url,
    scope: String,
}

/// OAuth token response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// New access token
    pub access_token: String,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Replacement refresh token, if the provider rotates them
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
}

/// OAuth error body (RFC 6749 §5.2)
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

impl OAuthClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an endpoint URL is invalid or the redirect URI is missing.
    pub fn from_config(http_client: Client, config: &OAuthConfig) -> Result<Self> {
        let redirect_uri = config
            .redirect_uri
            .clone()
            .ok_or_else(|| Error::Config("oauth.redirect_uri is not set".to_string()))?;
        let authorize_url = Url::parse(&config.authorize_url)
            .map_err(|e| Error::Config(format!("Invalid authorize URL: {e}")))?;
        let token_url = Url::parse(&config.token_url)
            .map_err(|e| Error::Config(format!("Invalid token URL: {e}")))?;

        Ok(Self {
            http_client,
            client_id: config.resolved_client_id(),
            client_secret: config.resolved_client_secret(),
            redirect_uri,
            authorize_url,
            token_url,
            scope: config.scope.clone(),
        })
    }

    /// Build the authorization URL the browser is sent to
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &self.scope)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", state);
        url.into()
    }

    /// Exchange an authorization code for tokens
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or [`Error::OAuth`] carrying the
    /// provider's `error_description`, `error`, or HTTP status.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!(redirect_uri = %self.redirect_uri, "Exchanging authorization code");
        let token = self.token_request(&params, "Token exchange").await?;
        info!("Authorization code exchanged");
        Ok(token)
    }

    /// Exchange a refresh token for a new access token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure or [`Error::OAuth`] if the
    /// provider rejects the refresh token or answers with a malformed body.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let token = self.token_request(&params, "Token refresh").await?;
        info!("Access token refreshed");
        Ok(token)
    }

    async fn token_request(
        &self,
        params: &[(&str, &str)],
        operation: &'static str,
    ) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: ErrorResponse = serde_json::from_str(&body).unwrap_or_default();
            let message = parsed
                .error_description
                .or(parsed.error)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
            warn!(operation, status = status.as_u16(), error = %message, "Token endpoint rejected request");
            return Err(Error::OAuth(format!("{operation} failed: {message}")));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::OAuth(format!("{operation} returned a malformed body: {e}")))
    }
}

/// Generate a random state parameter
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}

/// Generate a random session identifier (256 bits)
#[must_use]
pub fn generate_session_id() -> String {
    let id_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(id_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-abc".to_string(),
            client_secret: "shh".to_string(),
            redirect_uri: Some("http://localhost:3000/auth/callback".to_string()),
            authorize_url: "https://idp.example.com/trust/oauth/authorize".to_string(),
            token_url: "https://idp.example.com/trust/oauth/token".to_string(),
            scope: "writer".to_string(),
        }
    }

    #[test]
    fn authorization_url_carries_required_params() {
        let client = OAuthClient::from_config(Client::new(), &test_config()).unwrap();
        let url = Url::parse(&client.authorization_url("xyz")).unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/trust/oauth/authorize");
        assert_eq!(pairs["client_id"], "client-abc");
        assert_eq!(pairs["scope"], "writer");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["redirect_uri"], "http://localhost:3000/auth/callback");
        assert_eq!(pairs["state"], "xyz");
    }

    #[test]
    fn missing_redirect_uri_is_config_error() {
        let mut config = test_config();
        config.redirect_uri = None;
        let err = OAuthClient::from_config(Client::new(), &config).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn state_is_base64url_safe() {
        for _ in 0..10 {
            let state = generate_state();
            assert!(!state.contains('+'));
            assert!(!state.contains('/'));
            assert!(!state.contains('='));
            assert!(state.len() >= 20);
        }
    }

    #[test]
    fn session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        // 32 random bytes -> 43 base64url chars
        assert_eq!(a.len(), 43);
    }

    fn mock_config(server: &wiremock::MockServer) -> OAuthConfig {
        OAuthConfig {
            token_url: format!("{}/trust/oauth/token", server.uri()),
            ..test_config()
        }
    }

    #[tokio::test]
    async fn exchange_code_posts_authorization_code_grant() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trust/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::from_config(Client::new(), &mock_config(&server)).unwrap();
        let tokens = client.exchange_code("code-1").await.unwrap();
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.expires_in, Some(3600));

        let requests = server.received_requests().await.unwrap();
        let form: std::collections::HashMap<String, String> =
            serde_urlencoded::from_bytes(&requests[0].body).unwrap();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "code-1");
        assert_eq!(form["client_id"], "client-abc");
        assert_eq!(form["client_secret"], "shh");
        assert_eq!(form["redirect_uri"], "http://localhost:3000/auth/callback");
    }

    #[tokio::test]
    async fn token_errors_prefer_error_description() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code already used"
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::from_config(Client::new(), &mock_config(&server)).unwrap();
        let err = client.refresh("rt-1").await.unwrap_err();
        assert!(matches!(err, Error::OAuth(ref m) if m.contains("code already used")));
    }

    #[tokio::test]
    async fn token_errors_fall_back_to_status() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = OAuthClient::from_config(Client::new(), &mock_config(&server)).unwrap();
        let err = client.exchange_code("c").await.unwrap_err();
        assert!(matches!(err, Error::OAuth(ref m) if m.contains("Service Unavailable")));
    }
}
