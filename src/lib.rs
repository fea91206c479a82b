//! Context Tester Library
//!
//! Evaluate every feature flag of a project environment for an arbitrary
//! evaluation context, on behalf of a user signed in through OAuth.
//!
//! # Features
//!
//! - **Sign-in**: OAuth authorization code flow with transparent access-token refresh
//! - **Workspace navigation**: project, environment and flag listings from the management API
//! - **Evaluation**: short-lived engine clients keyed by the environment's evaluation key
//! - **Rendering**: human-readable explanations of evaluation reasons

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod flags;
pub mod gateway;
pub mod oauth;
pub mod render;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}")))?,
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("tracing: {e}")))?,
    }

    Ok(())
}
