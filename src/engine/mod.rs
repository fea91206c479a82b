//! Evaluation engine
//!
//! The engine computes a [`FlagsState`] for a context. It is reached through
//! two traits so the gateway never depends on a concrete engine:
//!
//! - [`EngineFactory`] builds a client scoped to one evaluation credential
//! - [`EngineClient`] waits for readiness, evaluates, and is closed afterwards
//!
//! [`evaluate_scoped`] owns a client for exactly one evaluation and closes it
//! on every exit path.

mod relay;

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use crate::Result;
use crate::flags::FlagsState;

pub use relay::{RelayEngine, RelayEngineFactory};

/// Options for an all-flags evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlagsStateOptions {
    /// Include evaluation reasons
    pub with_reasons: bool,
    /// Only include reasons for flags with event tracking enabled
    pub details_only_for_tracked_flags: bool,
}

impl FlagsStateOptions {
    /// Reasons for every flag, tracked or not
    #[must_use]
    pub fn all_with_reasons() -> Self {
        Self {
            with_reasons: true,
            details_only_for_tracked_flags: false,
        }
    }
}

/// Builds engine clients scoped to an evaluation credential
#[async_trait::async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    /// Create a client for `credential`. The client is not yet ready.
    async fn create(&self, credential: &str) -> Result<Box<dyn EngineClient>>;
}

/// A short-lived engine client
#[async_trait::async_trait]
pub trait EngineClient: Send + Sync {
    /// Wait until the client can evaluate, or fail after `timeout`.
    async fn wait_for_initialization(&self, timeout: Duration) -> Result<()>;

    /// Evaluate every flag for `context`.
    async fn all_flags_state(&self, context: &Value, options: FlagsStateOptions)
    -> Result<FlagsState>;

    /// Release the client. Called exactly once per client.
    async fn close(&self);
}

/// Create a client for `credential`, evaluate `context` with reasons for every
/// flag, and close the client whether evaluation succeeded, failed or panicked.
pub async fn evaluate_scoped(
    factory: &dyn EngineFactory,
    credential: &str,
    context: &Value,
    init_timeout: Duration,
) -> Result<FlagsState> {
    let client = factory.create(credential).await?;

    let outcome = AssertUnwindSafe(async {
        client.wait_for_initialization(init_timeout).await?;
        client
            .all_flags_state(context, FlagsStateOptions::all_with_reasons())
            .await
    })
    .catch_unwind()
    .await;

    client.close().await;
    debug!("Evaluation engine client closed");

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::Error;

    #[derive(Clone, Copy)]
    enum Behavior {
        Ok,
        InitFails,
        EvalFails,
        EvalPanics,
    }

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        closed: AtomicUsize,
    }

    struct StubFactory {
        behavior: Behavior,
        counters: Arc<Counters>,
    }

    struct StubClient {
        behavior: Behavior,
        counters: Arc<Counters>,
    }

    #[async_trait::async_trait]
    impl EngineFactory for StubFactory {
        async fn create(&self, _credential: &str) -> Result<Box<dyn EngineClient>> {
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubClient {
                behavior: self.behavior,
                counters: Arc::clone(&self.counters),
            }))
        }
    }

    #[async_trait::async_trait]
    impl EngineClient for StubClient {
        async fn wait_for_initialization(&self, _timeout: Duration) -> Result<()> {
            match self.behavior {
                Behavior::InitFails => Err(Error::EngineInit("timed out".into())),
                _ => Ok(()),
            }
        }

        async fn all_flags_state(
            &self,
            _context: &Value,
            options: FlagsStateOptions,
        ) -> Result<FlagsState> {
            assert_eq!(options, FlagsStateOptions::all_with_reasons());
            match self.behavior {
                Behavior::EvalFails => Err(Error::Engine("boom".into())),
                Behavior::EvalPanics => panic!("engine exploded"),
                _ => Ok(FlagsState::new(true)),
            }
        }

        async fn close(&self) {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn factory(behavior: Behavior) -> (StubFactory, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            StubFactory {
                behavior,
                counters: Arc::clone(&counters),
            },
            counters,
        )
    }

    #[tokio::test]
    async fn closes_after_success() {
        let (f, counters) = factory(Behavior::Ok);
        let state = evaluate_scoped(&f, "sdk-1", &json!({"key": "u"}), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(state.is_valid());
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closes_once_when_evaluation_fails() {
        let (f, counters) = factory(Behavior::EvalFails);
        let err = evaluate_scoped(&f, "sdk-1", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closes_when_initialization_fails() {
        let (f, counters) = factory(Behavior::InitFails);
        let err = evaluate_scoped(&f, "sdk-1", &json!({}), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EngineInit(_)));
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closes_before_propagating_panic() {
        let (f, counters) = factory(Behavior::EvalPanics);
        let handle = tokio::spawn(async move {
            evaluate_scoped(&f, "sdk-1", &json!({}), Duration::from_secs(1)).await
        });
        let join = handle.await;
        assert!(join.unwrap_err().is_panic());
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }
}
