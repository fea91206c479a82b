//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default identity provider / management API host
pub const DEFAULT_API_BASE: &str = "https://app.launchdarkly.com";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// OAuth client registration
    pub oauth: OAuthConfig,
    /// Flag-management API
    pub api: ApiConfig,
    /// Evaluation engine
    pub engine: EngineConfig,
    /// Browser session handling
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // CONTEXT_TESTER_OAUTH__CLIENT_ID -> oauth.client_id
        figment = figment.merge(Env::prefixed("CONTEXT_TESTER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();

        Ok(config)
    }

    /// Check the settings the server cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first missing or invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.resolved_client_id().is_empty() {
            return Err(Error::Config("oauth.client_id is not set".to_string()));
        }
        let Some(redirect) = self.oauth.redirect_uri.as_deref() else {
            return Err(Error::Config("oauth.redirect_uri is not set".to_string()));
        };
        url::Url::parse(redirect)
            .map_err(|e| Error::Config(format!("oauth.redirect_uri is invalid: {e}")))?;
        url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::Config(format!("api.base_url is invalid: {e}")))?;
        url::Url::parse(&self.engine.base_url)
            .map_err(|e| Error::Config(format!("engine.base_url is invalid: {e}")))?;
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Resolve a secret value: `env:VAR_NAME` reads the variable, anything else is literal.
#[must_use]
pub fn resolve_secret(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
        }
    }
}

/// OAuth client registration with the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Client ID (supports `env:VAR_NAME`)
    pub client_id: String,
    /// Client secret (supports `env:VAR_NAME`)
    pub client_secret: String,
    /// Registered redirect URI, pointing at `/auth/callback`
    pub redirect_uri: Option<String>,
    /// Authorization endpoint
    pub authorize_url: String,
    /// Token endpoint
    pub token_url: String,
    /// Requested scope
    pub scope: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: "env:LAUNCHDARKLY_CLIENT_ID".to_string(),
            client_secret: "env:LAUNCHDARKLY_CLIENT_SECRET".to_string(),
            redirect_uri: env::var("LAUNCHDARKLY_REDIRECT_URI").ok(),
            authorize_url: format!("{DEFAULT_API_BASE}/trust/oauth/authorize"),
            token_url: format!("{DEFAULT_API_BASE}/trust/oauth/token"),
            scope: "writer".to_string(),
        }
    }
}

impl OAuthConfig {
    /// Client ID with `env:` indirection resolved
    #[must_use]
    pub fn resolved_client_id(&self) -> String {
        resolve_secret(&self.client_id)
    }

    /// Client secret with `env:` indirection resolved
    #[must_use]
    pub fn resolved_client_secret(&self) -> String {
        resolve_secret(&self.client_secret)
    }
}

/// Flag-management REST API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL; `/api/v2/...` paths are appended
    pub base_url: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Evaluation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the evaluation service (Relay Proxy compatible)
    pub base_url: String,
    /// How long to wait for the engine to report ready
    #[serde(with = "humantime_serde")]
    pub init_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8030".to_string(),
            init_timeout: Duration::from_secs(5),
        }
    }
}

/// Browser session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie
    pub cookie_name: String,
    /// Mark cookies `Secure` (disable only for plain-http local development)
    pub secure_cookies: bool,
    /// How long a sign-in attempt may take before its state expires
    #[serde(with = "humantime_serde")]
    pub sign_in_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "context_tester_session".to_string(),
            secure_cookies: true,
            sign_in_ttl: Duration::from_secs(600),
        }
    }
}
