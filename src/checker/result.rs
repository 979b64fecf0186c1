//! Result model: cases, suites, summaries, fixtures, run metadata

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Target;
use crate::error::CheckError;

/// Status of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    /// The probe behaved as required
    Passed,
    /// The probe violated a requirement
    Failed,
    /// The probe did not apply to this target
    Skipped,
    /// The probe passed with reservations
    Warning,
}

/// Structured error attached to a failed case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseError {
    /// Logical error type from the harness taxonomy
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable description
    pub message: String,
    /// Optional backtrace or context chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Name of a captured fixture that reproduces the failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<String>,
    /// Free-form extra context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl CaseError {
    /// Build a structured error from any harness error, preserving the
    /// typed taxonomy name when the cause is a [`CheckError`].
    pub fn from_error(err: &anyhow::Error) -> Self {
        let kind = err
            .downcast_ref::<CheckError>()
            .map_or("InternalError", CheckError::taxonomy)
            .to_string();
        Self {
            kind,
            message: err.to_string(),
            stack: None,
            fixture: None,
            details: None,
        }
    }
}

/// The smallest reportable unit: one probe with a status and a duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    /// Case name, unique within its suite
    pub name: String,
    /// Outcome
    pub status: CaseStatus,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Free-form observations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Present when `status` is `failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
    /// Non-fatal observations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TestCaseResult {
    /// A passed case.
    pub fn passed(name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Passed,
            duration_ms,
            details: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    /// A failed case carrying a structured error.
    pub fn failed(name: impl Into<String>, duration_ms: u64, error: CaseError) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Failed,
            duration_ms,
            details: None,
            error: Some(error),
            warnings: Vec::new(),
        }
    }

    /// A skipped case with a reason in `details`.
    pub fn skipped(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Skipped,
            duration_ms: 0,
            details: Some(Value::String(reason.into())),
            error: None,
            warnings: Vec::new(),
        }
    }

    /// A warning case with its observations.
    pub fn warning(name: impl Into<String>, duration_ms: u64, warnings: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status: CaseStatus::Warning,
            duration_ms,
            details: None,
            error: None,
            warnings,
        }
    }

    /// Attach free-form details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Duration and outcome of a suite's setup or teardown phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseResult {
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
    /// Present when the phase failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated outcome of one suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteResult {
    /// Suite name
    pub name: String,
    /// Derived status: failed beats warning beats passed
    pub status: CaseStatus,
    /// Wall-clock duration in milliseconds, phases included
    pub duration_ms: u64,
    /// Per-case outcomes in execution order
    pub cases: Vec<TestCaseResult>,
    /// Setup phase record, when the suite defines one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup: Option<PhaseResult>,
    /// Teardown phase record, when the suite defines one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown: Option<PhaseResult>,
}

impl TestSuiteResult {
    /// Build a suite result, deriving the status from its cases.
    pub fn from_cases(name: impl Into<String>, duration_ms: u64, cases: Vec<TestCaseResult>) -> Self {
        let status = Self::derive_status(&cases);
        Self {
            name: name.into(),
            status,
            duration_ms,
            cases,
            setup: None,
            teardown: None,
        }
    }

    /// `failed` if any case failed; else `warning` if any warned; else
    /// `passed`.
    pub fn derive_status(cases: &[TestCaseResult]) -> CaseStatus {
        if cases.iter().any(|c| c.status == CaseStatus::Failed) {
            CaseStatus::Failed
        } else if cases.iter().any(|c| c.status == CaseStatus::Warning) {
            CaseStatus::Warning
        } else {
            CaseStatus::Passed
        }
    }
}

/// Case counts across the whole run. `total` counts cases, not suites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Every case in every executed suite
    pub total: usize,
    /// Cases that passed
    pub passed: usize,
    /// Cases that failed
    pub failed: usize,
    /// Cases that were skipped
    pub skipped: usize,
    /// Cases that warned
    pub warnings: usize,
}

impl Summary {
    /// Fold one suite's cases into the counts.
    pub fn absorb(&mut self, suite: &TestSuiteResult) {
        for case in &suite.cases {
            self.total += 1;
            match case.status {
                CaseStatus::Passed => self.passed += 1,
                CaseStatus::Failed => self.failed += 1,
                CaseStatus::Skipped => self.skipped += 1,
                CaseStatus::Warning => self.warnings += 1,
            }
        }
    }
}

/// Host environment snapshot embedded in the run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentInfo {
    /// Operating system family
    pub os: String,
    /// CPU architecture
    pub arch: String,
    /// Host name when the environment exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl EnvironmentInfo {
    /// Capture the current host.
    pub fn capture() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            hostname: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .ok(),
        }
    }
}

/// Metadata describing one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    /// Harness version
    pub version: String,
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// Run completion time
    pub completed_at: DateTime<Utc>,
    /// Wall-clock run duration in milliseconds
    pub duration_ms: u64,
    /// Host environment
    pub environment: EnvironmentInfo,
}

/// A captured scenario sufficient to re-execute a failure deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    /// Fixture name, referenced from case errors
    pub name: String,
    /// Suite that captured it
    pub suite: String,
    /// The target specification in effect
    pub target: Target,
    /// Chaos seed in effect, when chaos was active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chaos_seed: Option<u64>,
    /// Input that provoked the behaviour
    pub input: Value,
    /// What the suite expected
    pub expected: Value,
    /// What actually happened
    pub actual: Value,
    /// Capture time
    pub captured_at: DateTime<Utc>,
}

/// Everything a run produced. Built additively and frozen when
/// [`crate::checker::Checker::run`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResults {
    /// Case counts
    pub summary: Summary,
    /// Per-suite outcomes in execution order
    pub suites: Vec<TestSuiteResult>,
    /// Captured fixtures
    pub fixtures: Vec<Fixture>,
    /// Run metadata
    pub metadata: RunMetadata,
}

impl TestResults {
    /// Whether every case passed (warnings do not fail a run by
    /// themselves).
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(status: CaseStatus) -> TestCaseResult {
        TestCaseResult {
            name: "case".to_string(),
            status,
            duration_ms: 1,
            details: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_suite_status_failed_beats_warning() {
        let cases = vec![
            case(CaseStatus::Passed),
            case(CaseStatus::Warning),
            case(CaseStatus::Failed),
        ];
        assert_eq!(TestSuiteResult::derive_status(&cases), CaseStatus::Failed);
    }

    #[test]
    fn test_suite_status_warning_beats_passed() {
        let cases = vec![case(CaseStatus::Passed), case(CaseStatus::Warning)];
        assert_eq!(TestSuiteResult::derive_status(&cases), CaseStatus::Warning);
    }

    #[test]
    fn test_suite_status_all_skipped_is_passed() {
        let cases = vec![case(CaseStatus::Skipped)];
        assert_eq!(TestSuiteResult::derive_status(&cases), CaseStatus::Passed);
    }

    #[test]
    fn test_summary_counts_add_up() {
        let suite = TestSuiteResult::from_cases(
            "s",
            10,
            vec![
                case(CaseStatus::Passed),
                case(CaseStatus::Failed),
                case(CaseStatus::Skipped),
                case(CaseStatus::Warning),
                case(CaseStatus::Passed),
            ],
        );
        let mut summary = Summary::default();
        summary.absorb(&suite);
        assert_eq!(summary.total, 5);
        assert_eq!(
            summary.passed + summary.failed + summary.skipped + summary.warnings,
            summary.total
        );
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn test_case_error_preserves_taxonomy_name() {
        let err: anyhow::Error = CheckError::WaitTimeout(250).into();
        let case_err = CaseError::from_error(&err);
        assert_eq!(case_err.kind, "WaitTimeout");
        assert!(case_err.message.contains("250"));
    }

    #[test]
    fn test_results_serialize_camel_case() {
        let results = TestResults {
            summary: Summary::default(),
            suites: vec![],
            fixtures: vec![],
            metadata: RunMetadata {
                version: "0.3.0".to_string(),
                started_at: Utc::now(),
                completed_at: Utc::now(),
                duration_ms: 5,
                environment: EnvironmentInfo::capture(),
            },
        };
        let encoded = serde_json::to_value(&results).unwrap();
        assert!(encoded["metadata"].get("startedAt").is_some());
        assert!(encoded["metadata"].get("durationMs").is_some());
        assert!(encoded["summary"].get("total").is_some());
    }
}
