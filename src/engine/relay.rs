//! Evaluation through a Relay-Proxy-compatible service
//!
//! Readiness is the service's `GET /status`; evaluation is
//! `REPORT /sdk/evalx/contexts?withReasons=true` with the context as the body
//! and the evaluation key as the `Authorization` header.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, Method, header};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{EngineClient, EngineFactory, FlagsStateOptions};
use crate::flags::{EvaluationReason, FlagRecord, FlagsState};
use crate::{Error, Result};

/// Factory for [`RelayEngine`] clients
#[derive(Debug, Clone)]
pub struct RelayEngineFactory {
    http: Client,
    base_url: Url,
}

impl RelayEngineFactory {
    /// Create a factory for the service at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not a valid base URL.
    pub fn new(http: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid engine base URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Engine base URL cannot be a base: {base_url}"
            )));
        }
        Ok(Self { http, base_url })
    }
}

#[async_trait::async_trait]
impl EngineFactory for RelayEngineFactory {
    async fn create(&self, credential: &str) -> Result<Box<dyn EngineClient>> {
        if credential.is_empty() {
            return Err(Error::EngineInit("empty evaluation key".to_string()));
        }
        Ok(Box::new(RelayEngine {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            credential: credential.to_string(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Engine client bound to one evaluation key
pub struct RelayEngine {
    http: Client,
    base_url: Url,
    credential: String,
    closed: AtomicBool,
}

/// One flag in an evalx response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvalxFlag {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    variation: Option<u32>,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    flag_version: Option<u64>,
    #[serde(default)]
    reason: Option<EvaluationReason>,
    #[serde(default)]
    track_events: bool,
    #[serde(default)]
    track_reason: bool,
}

impl RelayEngine {
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Engine("engine client already closed".to_string()));
        }
        Ok(())
    }
}

fn into_flags_state(flags: HashMap<String, EvalxFlag>, options: FlagsStateOptions) -> FlagsState {
    let mut state = FlagsState::new(true);
    for (key, flag) in flags {
        let include_reason = options.with_reasons
            && (!options.details_only_for_tracked_flags || flag.track_events || flag.track_reason);
        let record = FlagRecord {
            variation: flag.variation,
            version: flag.flag_version.or(flag.version).unwrap_or_default(),
            reason: if include_reason { flag.reason } else { None },
            track_events: flag.track_events,
        };
        state.insert(key, flag.value, record);
    }
    state
}

#[async_trait::async_trait]
impl EngineClient for RelayEngine {
    async fn wait_for_initialization(&self, timeout: Duration) -> Result<()> {
        self.ensure_open()?;
        let request = self.http.get(self.url(&["status"])).send();

        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| {
                Error::EngineInit(format!("not ready after {}ms", timeout.as_millis()))
            })?
            .map_err(|e| Error::EngineInit(format!("status check failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::EngineInit(format!("status check returned HTTP {status}")));
        }
        debug!("Evaluation engine ready");
        Ok(())
    }

    async fn all_flags_state(
        &self,
        context: &Value,
        options: FlagsStateOptions,
    ) -> Result<FlagsState> {
        self.ensure_open()?;
        let mut url = self.url(&["sdk", "evalx", "contexts"]);
        if options.with_reasons {
            url.query_pairs_mut().append_pair("withReasons", "true");
        }

        let method = Method::from_bytes(b"REPORT")
            .map_err(|e| Error::Internal(format!("REPORT method: {e}")))?;
        let response = self
            .http
            .request(method, url)
            .header(header::AUTHORIZATION, &self.credential)
            .json(context)
            .send()
            .await
            .map_err(|e| Error::Engine(format!("evaluation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "Evaluation service rejected request");
            return Err(Error::Engine(format!("evaluation returned HTTP {status}")));
        }

        let flags: HashMap<String, EvalxFlag> = response
            .json()
            .await
            .map_err(|e| Error::Engine(format!("malformed evaluation response: {e}")))?;

        Ok(into_flags_state(flags, options))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("Evaluation engine client closed twice");
        }
    }
}
