//! Per-run context shared by every suite

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use crate::chaos::ChaosController;
use crate::checker::result::Fixture;
use crate::config::CheckConfig;
use crate::mcp::McpClient;
use crate::transport::Transport;

/// Shared store of fixtures captured during a run.
///
/// Suites append through [`TestContext::record_fixture`]; the checker
/// snapshots the store into the final results.
#[derive(Debug, Clone, Default)]
pub struct FixtureStore {
    fixtures: Arc<Mutex<Vec<Fixture>>>,
}

impl FixtureStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fixture.
    pub fn record(&self, fixture: Fixture) {
        self.fixtures
            .lock()
            .expect("fixture store poisoned")
            .push(fixture);
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<Fixture> {
        self.fixtures
            .lock()
            .expect("fixture store poisoned")
            .clone()
    }
}

/// Everything a suite needs to drive the target.
///
/// One context is built per run and shared across suites: the same
/// transport connection, the same client, the same chaos controller.
/// Suites must not close the transport; the checker owns its lifecycle.
#[derive(Clone)]
pub struct TestContext {
    /// Run configuration
    pub config: Arc<CheckConfig>,
    /// The run's shared transport
    pub transport: Arc<dyn Transport>,
    /// JSON-RPC client bound to `transport`
    pub client: Arc<McpClient>,
    /// Chaos controller, when the run carries one
    pub chaos: Option<Arc<ChaosController>>,
    /// Shared fixture store
    pub fixtures: FixtureStore,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("target", &self.config.target.describe())
            .field("chaos", &self.chaos.is_some())
            .finish_non_exhaustive()
    }
}

impl TestContext {
    /// The configured handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.connect_ms)
    }

    /// The configured per-request deadline.
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.invoke_ms)
    }

    /// The configured streaming deadline.
    pub fn stream_timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeouts.stream_ms)
    }

    /// Capture a reproducible failure scenario.
    pub fn record_fixture(
        &self,
        suite: &str,
        name: impl Into<String>,
        input: Value,
        expected: Value,
        actual: Value,
    ) {
        self.fixtures.record(Fixture {
            name: name.into(),
            suite: suite.to_string(),
            target: self.config.target.clone(),
            chaos_seed: self.chaos.as_ref().map(|c| c.seed()),
            input,
            expected,
            actual,
            captured_at: Utc::now(),
        });
    }
}
