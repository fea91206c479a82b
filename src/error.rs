//! Error types for the context tester

use std::io;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Result type alias for the context tester
pub type Result<T> = std::result::Result<T, Error>;

/// Context tester errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller has no usable session
    #[error("Unauthorized")]
    Unauthorized,

    /// Malformed or incomplete request input
    #[error("{0}")]
    BadRequest(String),

    /// Upstream API answered with a non-success status
    #[error("{operation} failed with HTTP {status}")]
    Upstream {
        /// What the gateway was trying to do
        operation: &'static str,
        /// Status code returned by the upstream API
        status: u16,
    },

    /// Identity provider rejected an OAuth exchange
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Environment lookup succeeded but carried no evaluation key
    #[error("Could not resolve evaluation key for {project}/{environment}")]
    MissingCredential {
        /// Project key
        project: String,
        /// Environment key
        environment: String,
    },

    /// Evaluation engine did not become ready
    #[error("Evaluation engine initialization failed: {0}")]
    EngineInit(String),

    /// Evaluation engine failed while computing flags state
    #[error("Evaluation engine error: {0}")]
    Engine(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a bad-request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// HTTP status surfaced to the browser for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the browser.
    ///
    /// Only `BadRequest` is passed through verbatim; upstream and internal
    /// failures get a generic message and the detail stays in the log.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::BadRequest(message) => message.clone(),
            Self::Upstream { operation, .. } => format!("Failed to {operation}"),
            Self::MissingCredential { .. } => "Could not get SDK key".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}
