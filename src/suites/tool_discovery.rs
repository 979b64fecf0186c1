//! Tool-discovery suite: listing, naming, schemas, expectations

use std::collections::HashSet;
use std::time::Instant;

use serde_json::{json, Value};

use crate::checker::{run_case, CaseOutcome, TestContext, TestSuite, TestSuiteResult};
use crate::error::{CheckError, Result};
use crate::suites::ensure_session;

/// Verifies `tools/list`: the call succeeds, names are unique, every tool
/// carries a JSON-schema-like `inputSchema`, required expected tools are
/// present, and tools without descriptions are reported as warnings.
pub struct ToolDiscoverySuite;

/// A schema is JSON-schema-like when it is an object exposing at least
/// one of `type`, `properties`, or `$ref`.
fn is_schema_like(schema: &Value) -> bool {
    schema.as_object().is_some_and(|map| {
        map.contains_key("type") || map.contains_key("properties") || map.contains_key("$ref")
    })
}

#[async_trait::async_trait]
impl TestSuite for ToolDiscoverySuite {
    fn name(&self) -> &'static str {
        "tool-discovery"
    }

    fn description(&self) -> &'static str {
        "tools/list round-trip, unique names, input schemas, expected tools"
    }

    fn tags(&self) -> &'static [&'static str] {
        &["core", "tools"]
    }

    async fn setup(&self, context: &TestContext) -> Result<()> {
        ensure_session(context).await.map(|_| ())
    }

    async fn execute(&self, context: &TestContext) -> Result<TestSuiteResult> {
        let started = Instant::now();
        let mut cases = Vec::new();

        let list_started = Instant::now();
        let tools = match context.client.list_tools().await {
            Ok(tools) => {
                let count = tools.len();
                let duration = list_started.elapsed().as_millis() as u64;
                cases.push(
                    run_case("list-tools", async move {
                        Ok(CaseOutcome::Passed(Some(json!({"count": count}))))
                    })
                    .await,
                );
                // Preserve the real round-trip duration, not the closure's.
                if let Some(case) = cases.last_mut() {
                    case.duration_ms = duration;
                }
                tools
            }
            Err(err) => {
                cases.push(run_case("list-tools", async { Err(err) }).await);
                return Ok(TestSuiteResult::from_cases(
                    self.name(),
                    started.elapsed().as_millis() as u64,
                    cases,
                ));
            }
        };

        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        cases.push(
            run_case("unique-names", async {
                let mut seen = HashSet::new();
                let duplicates: Vec<&&str> =
                    names.iter().filter(|name| !seen.insert(**name)).collect();
                if duplicates.is_empty() {
                    Ok(CaseOutcome::Passed(None))
                } else {
                    Err(CheckError::Validation(format!(
                        "duplicate tool names: {duplicates:?}"
                    ))
                    .into())
                }
            })
            .await,
        );

        cases.push(
            run_case("input-schemas", async {
                let offenders: Vec<&str> = tools
                    .iter()
                    .filter(|t| !is_schema_like(&t.input_schema))
                    .map(|t| t.name.as_str())
                    .collect();
                if offenders.is_empty() {
                    Ok(CaseOutcome::Passed(None))
                } else {
                    Err(CheckError::Validation(format!(
                        "tools without a JSON-schema-like inputSchema: {offenders:?}"
                    ))
                    .into())
                }
            })
            .await,
        );

        let required: Vec<&str> = context
            .config
            .expectations
            .tools
            .iter()
            .filter(|t| t.required)
            .map(|t| t.name.as_str())
            .collect();
        let ctx = context.clone();
        let suite_name = self.name();
        let advertised: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        cases.push(
            run_case("required-tools", async move {
                let missing: Vec<&&str> = required
                    .iter()
                    .filter(|name| !advertised.iter().any(|a| a == **name))
                    .collect();
                if missing.is_empty() {
                    Ok(CaseOutcome::Passed(Some(json!({"required": required}))))
                } else {
                    ctx.record_fixture(
                        suite_name,
                        "missing-required-tools",
                        json!({"method": "tools/list"}),
                        json!({"tools": required}),
                        json!({"tools": advertised}),
                    );
                    Err(CheckError::Validation(format!(
                        "required tools not advertised: {missing:?}"
                    ))
                    .into())
                }
            })
            .await,
        );

        cases.push(
            run_case("tool-descriptions", async {
                let undocumented: Vec<String> = tools
                    .iter()
                    .filter(|t| t.description.as_deref().map_or(true, str::is_empty))
                    .map(|t| format!("tool `{}` has no description", t.name))
                    .collect();
                if undocumented.is_empty() {
                    Ok(CaseOutcome::Passed(None))
                } else {
                    Ok(CaseOutcome::Warning(undocumented))
                }
            })
            .await,
        );

        Ok(TestSuiteResult::from_cases(
            self.name(),
            started.elapsed().as_millis() as u64,
            cases,
        ))
    }
}
