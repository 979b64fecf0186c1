//! Checker: the suite orchestrator
//!
//! The [`Checker`] owns a run from end to end: it selects suites, creates
//! one transport through the configured factory, wires the chaos
//! controller into it, builds the shared [`TestContext`], drives each
//! suite through validate/setup/execute/teardown, aggregates results, and
//! guarantees the transport is torn down on every exit path.
//!
//! Lifecycle events stream to registered observers in registration order:
//! `Start`, `SuiteStart`, `SuiteComplete`, `Complete`, and `Error`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::chaos::ChaosController;
use crate::config::{CheckConfig, RunOptions, SuiteSelection};
use crate::error::{CheckError, Result};
use crate::mcp::McpClient;
use crate::transport::{Transport, TransportFactory};

pub mod context;
pub mod result;
pub mod suite;

pub use context::{FixtureStore, TestContext};
pub use result::{
    CaseError, CaseStatus, EnvironmentInfo, Fixture, PhaseResult, RunMetadata, Summary,
    TestCaseResult, TestResults, TestSuiteResult,
};
pub use suite::{run_case, CaseOutcome, SuiteValidation, TestSuite};

/// Lifecycle events emitted during a run.
#[derive(Debug, Clone)]
pub enum CheckerEvent {
    /// A run began with this configuration.
    Start {
        /// The effective configuration
        config: Box<CheckConfig>,
    },
    /// A suite is about to execute.
    SuiteStart {
        /// Suite name
        name: String,
    },
    /// A suite finished.
    SuiteComplete {
        /// The suite's aggregated result
        result: TestSuiteResult,
    },
    /// The run finished.
    Complete {
        /// The frozen results
        results: Box<TestResults>,
    },
    /// An orchestration-level error occurred.
    Error {
        /// Human-readable description
        message: String,
    },
}

/// Suite orchestrator. One cooperative run at a time per instance.
pub struct Checker {
    config: CheckConfig,
    suites: Mutex<Vec<Arc<dyn TestSuite>>>,
    transport_factory: Mutex<Option<Arc<dyn TransportFactory>>>,
    chaos: Mutex<Option<Arc<ChaosController>>>,
    observers: Mutex<Vec<mpsc::UnboundedSender<CheckerEvent>>>,
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("target", &self.config.target.describe())
            .field(
                "suites",
                &self
                    .suites
                    .lock()
                    .expect("suite list poisoned")
                    .iter()
                    .map(|s| s.name())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Create a checker for one configuration.
    pub fn new(config: CheckConfig) -> Self {
        Self {
            config,
            suites: Mutex::new(Vec::new()),
            transport_factory: Mutex::new(None),
            chaos: Mutex::new(None),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// The configuration this checker runs against.
    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Register a suite. Registration order is execution order; a suite
    /// with an already-registered name replaces the earlier one in place
    /// (last write wins).
    pub fn register_suite(&self, suite: Arc<dyn TestSuite>) {
        let mut suites = self.suites.lock().expect("suite list poisoned");
        if let Some(existing) = suites.iter_mut().find(|s| s.name() == suite.name()) {
            *existing = suite;
        } else {
            suites.push(suite);
        }
    }

    /// Names of every registered suite, in execution order.
    pub fn suite_names(&self) -> Vec<String> {
        self.suites
            .lock()
            .expect("suite list poisoned")
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Set the factory used to create the run's transport.
    pub fn set_transport_factory(&self, factory: Arc<dyn TransportFactory>) {
        *self
            .transport_factory
            .lock()
            .expect("factory slot poisoned") = Some(factory);
    }

    /// Attach a chaos controller to future runs.
    pub fn set_chaos_controller(&self, chaos: Arc<ChaosController>) {
        *self.chaos.lock().expect("chaos slot poisoned") = Some(chaos);
    }

    /// Observe lifecycle events from this point on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CheckerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers
            .lock()
            .expect("observer list poisoned")
            .push(tx);
        rx
    }

    fn emit(&self, event: CheckerEvent) {
        self.observers
            .lock()
            .expect("observer list poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Intersect the config selection, the run options, and the tag
    /// filters. Missing names are logged and skipped.
    fn select_suites(&self, options: &RunOptions) -> Result<Vec<Arc<dyn TestSuite>>> {
        let registered = self.suites.lock().expect("suite list poisoned").clone();

        let mut selected: Vec<Arc<dyn TestSuite>> = match &self.config.suites {
            SuiteSelection::Keyword(k) if k == "all" => registered.clone(),
            SuiteSelection::Keyword(other) => {
                return Err(CheckError::NoValidSuites(format!(
                    "unknown suite selection keyword `{other}`"
                ))
                .into());
            }
            SuiteSelection::Named(names) => {
                let mut picked = Vec::new();
                for name in names {
                    match registered.iter().find(|s| s.name() == name) {
                        Some(suite) => picked.push(Arc::clone(suite)),
                        None => tracing::warn!(
                            target: "mcprobe::checker",
                            suite = %name,
                            "configured suite is not registered; skipping"
                        ),
                    }
                }
                picked
            }
        };

        if let Some(requested) = &options.suites {
            selected.retain(|s| requested.iter().any(|name| name == s.name()));
            for name in requested {
                if !selected.iter().any(|s| s.name() == name) {
                    tracing::warn!(
                        target: "mcprobe::checker",
                        suite = %name,
                        "requested suite is not available; skipping"
                    );
                }
            }
        }

        if !options.tags.is_empty() {
            selected.retain(|s| s.tags().iter().any(|t| options.tags.iter().any(|f| f == t)));
        }
        if !options.exclude_tags.is_empty() {
            selected.retain(|s| {
                !s.tags()
                    .iter()
                    .any(|t| options.exclude_tags.iter().any(|f| f == t))
            });
        }

        if selected.is_empty() {
            return Err(CheckError::NoValidSuites(
                "suite selection and tag filters matched nothing".into(),
            )
            .into());
        }
        Ok(selected)
    }

    /// Execute the configured battery against the target.
    ///
    /// # Errors
    ///
    /// Orchestration-level failures (no factory, empty selection, connect
    /// failures) emit an `Error` event and propagate. Suite failures never
    /// propagate; they are recorded in the results.
    pub async fn run(&self, options: RunOptions) -> Result<TestResults> {
        self.emit(CheckerEvent::Start {
            config: Box::new(self.config.clone()),
        });

        match self.run_inner(&options).await {
            Ok(results) => Ok(results),
            Err(err) => {
                self.emit(CheckerEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn run_inner(&self, options: &RunOptions) -> Result<TestResults> {
        let started_at = Utc::now();
        let started = Instant::now();

        let selected = self.select_suites(options)?;

        let factory = self
            .transport_factory
            .lock()
            .expect("factory slot poisoned")
            .clone()
            .ok_or(CheckError::TransportFactoryNotSet)?;

        let chaos = self.chaos.lock().expect("chaos slot poisoned").clone();

        let transport: Arc<dyn Transport> = factory.create(self.config.target.kind())?;
        if let Some(chaos) = &chaos {
            transport.set_chaos(Arc::clone(chaos));
            chaos.initialize_plugins();
            if self.config.chaos.enable {
                chaos.enable();
            }
        }

        if let Err(err) = transport.connect(&self.config.target).await {
            // The carrier may hold partial resources (a spawned child, a
            // half-open socket); tear it down before surfacing the error.
            if let Err(close_err) = transport.close().await {
                tracing::warn!(
                    target: "mcprobe::checker",
                    "cleanup after failed connect also failed: {close_err}"
                );
            }
            return Err(err);
        }

        let client = McpClient::new(
            Arc::clone(&transport),
            Duration::from_millis(self.config.timeouts.invoke_ms),
        );
        let context = TestContext {
            config: Arc::new(self.config.clone()),
            transport: Arc::clone(&transport),
            client,
            chaos: chaos.clone(),
            fixtures: FixtureStore::new(),
        };

        let mut summary = Summary::default();
        let mut suite_results = Vec::new();

        for suite in &selected {
            self.emit(CheckerEvent::SuiteStart {
                name: suite.name().to_string(),
            });

            let span = tracing::info_span!("suite", name = suite.name());
            let result = self
                .run_suite(suite.as_ref(), &context)
                .instrument(span)
                .await;

            self.emit(CheckerEvent::SuiteComplete {
                result: result.clone(),
            });
            summary.absorb(&result);

            let stop = options.fail_fast
                && (result.status == CaseStatus::Failed
                    || (options.strict && result.status == CaseStatus::Warning));
            suite_results.push(result);
            if stop {
                tracing::info!(
                    target: "mcprobe::checker",
                    "fail-fast: stopping after the first failed suite"
                );
                break;
            }
        }

        // Cleanup must not mask results.
        if let Some(chaos) = &chaos {
            chaos.restore().await;
        }
        if let Err(err) = context.client.close().await {
            tracing::warn!(target: "mcprobe::checker", "transport close failed: {err}");
        }

        let completed_at = Utc::now();
        let results = TestResults {
            summary,
            suites: suite_results,
            fixtures: if self.config.reporting.include_fixtures {
                context.fixtures.snapshot()
            } else {
                Vec::new()
            },
            metadata: RunMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                started_at,
                completed_at,
                duration_ms: started.elapsed().as_millis() as u64,
                environment: EnvironmentInfo::capture(),
            },
        };

        self.emit(CheckerEvent::Complete {
            results: Box::new(results.clone()),
        });
        Ok(results)
    }

    /// Drive one suite through validate/setup/execute/teardown. Never
    /// propagates: every failure mode is folded into the returned result.
    async fn run_suite(&self, suite: &dyn TestSuite, context: &TestContext) -> TestSuiteResult {
        let started = Instant::now();

        let validation = suite.validate(&self.config);
        for warning in &validation.warnings {
            tracing::warn!(
                target: "mcprobe::checker",
                suite = suite.name(),
                "validation warning: {warning}"
            );
        }
        if !validation.is_valid() {
            let case = TestCaseResult::failed(
                "validation",
                started.elapsed().as_millis() as u64,
                CaseError {
                    kind: "ValidationError".to_string(),
                    message: validation.errors.join("; "),
                    stack: None,
                    fixture: None,
                    details: None,
                },
            );
            return TestSuiteResult::from_cases(
                suite.name(),
                started.elapsed().as_millis() as u64,
                vec![case],
            );
        }

        let setup_started = Instant::now();
        let setup = match suite.setup(context).await {
            Ok(()) => PhaseResult {
                duration_ms: setup_started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(err) => {
                let mut result = TestSuiteResult::from_cases(
                    suite.name(),
                    started.elapsed().as_millis() as u64,
                    Vec::new(),
                );
                result.status = CaseStatus::Failed;
                result.setup = Some(PhaseResult {
                    duration_ms: setup_started.elapsed().as_millis() as u64,
                    error: Some(err.to_string()),
                });
                return result;
            }
        };

        let mut result = match suite.execute(context).await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(
                    target: "mcprobe::checker",
                    suite = suite.name(),
                    "suite crashed: {err}"
                );
                TestSuiteResult::from_cases(
                    suite.name(),
                    started.elapsed().as_millis() as u64,
                    vec![TestCaseResult::failed(
                        "execute",
                        started.elapsed().as_millis() as u64,
                        CaseError::from_error(&err),
                    )],
                )
            }
        };

        let teardown_started = Instant::now();
        let teardown = match suite.teardown(context).await {
            Ok(()) => PhaseResult {
                duration_ms: teardown_started.elapsed().as_millis() as u64,
                error: None,
            },
            Err(err) => {
                if result.status == CaseStatus::Passed {
                    result.status = CaseStatus::Warning;
                }
                PhaseResult {
                    duration_ms: teardown_started.elapsed().as_millis() as u64,
                    error: Some(err.to_string()),
                }
            }
        };

        result.name = suite.name().to_string();
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.setup = Some(setup);
        result.teardown = Some(teardown);
        result
    }
}
