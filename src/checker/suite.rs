//! The contract every test suite implements

use crate::checker::context::TestContext;
use crate::checker::result::{CaseError, TestCaseResult, TestSuiteResult};
use crate::config::CheckConfig;
use crate::error::Result;

/// Outcome of [`TestSuite::validate`].
#[derive(Debug, Clone, Default)]
pub struct SuiteValidation {
    /// Problems that prevent the suite from running
    pub errors: Vec<String>,
    /// Observations that do not block execution
    pub warnings: Vec<String>,
}

impl SuiteValidation {
    /// A configuration this suite can run against.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A configuration this suite rejects.
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
        }
    }

    /// Whether the suite may execute.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A self-contained validator and executor producing suite results.
///
/// `execute` must not propagate errors for individual probe failures --
/// those become failed cases in the returned result. An `Err` from
/// `execute` is treated as a suite-level crash and recorded by the
/// checker as a single failed case.
#[async_trait::async_trait]
pub trait TestSuite: Send + Sync {
    /// Unique suite name; duplicate registrations replace earlier ones.
    fn name(&self) -> &'static str;

    /// Suite version, reported alongside results.
    fn version(&self) -> &'static str {
        "1.0.0"
    }

    /// One-line description for listings.
    fn description(&self) -> &'static str;

    /// Tags used by the run options' tag filters.
    fn tags(&self) -> &'static [&'static str] {
        &[]
    }

    /// Fast, pure configuration check. Called before `execute`; a failing
    /// validation short-circuits the suite to a synthetic failed
    /// `validation` case.
    fn validate(&self, _config: &CheckConfig) -> SuiteValidation {
        SuiteValidation::ok()
    }

    /// Optional preparation; a failure marks the suite failed without
    /// running any cases.
    async fn setup(&self, _context: &TestContext) -> Result<()> {
        Ok(())
    }

    /// Run the suite's probes against the shared context.
    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult>;

    /// Optional cleanup; a failure downgrades a passing suite to a
    /// warning but never fails it.
    async fn teardown(&self, _context: &TestContext) -> Result<()> {
        Ok(())
    }
}

/// Time an async probe and convert its outcome into a [`TestCaseResult`].
///
/// The future resolves to `Ok(outcome)` for pass/warn/skip shapes or
/// `Err` for a failure, which is recorded with its taxonomy type.
pub async fn run_case<Fut>(name: &str, probe: Fut) -> TestCaseResult
where
    Fut: std::future::Future<Output = Result<CaseOutcome>>,
{
    let started = std::time::Instant::now();
    let outcome = probe.await;
    let duration_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(outcome) => outcome.into_case(name, duration_ms),
        Err(err) => TestCaseResult::failed(name, duration_ms, CaseError::from_error(&err)),
    }
}

/// Successful shapes a probe can resolve to.
#[derive(Debug, Clone)]
pub enum CaseOutcome {
    /// The probe passed, optionally with observations
    Passed(Option<serde_json::Value>),
    /// The probe passed with reservations
    Warning(Vec<String>),
    /// The probe did not apply
    Skipped(String),
}

impl CaseOutcome {
    fn into_case(self, name: &str, duration_ms: u64) -> TestCaseResult {
        match self {
            Self::Passed(details) => {
                let mut case = TestCaseResult::passed(name, duration_ms);
                case.details = details;
                case
            }
            Self::Warning(warnings) => TestCaseResult::warning(name, duration_ms, warnings),
            Self::Skipped(reason) => TestCaseResult::skipped(name, reason),
        }
    }
}
