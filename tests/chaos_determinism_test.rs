//! Chaos reproducibility: identical seeds produce identical verdicts
//!
//! Two runs with the same chaos seed and intensity over the same target
//! must inject the same faults at the same points, so every suite and
//! case resolves to the same status both times.

mod common;

use std::sync::Arc;

use mcprobe::chaos::ChaosController;
use mcprobe::checker::{CaseStatus, Checker};
use mcprobe::config::{
    ChaosConfig, CheckConfig, NetworkChaosConfig, RunOptions, SuiteSelection,
};
use mcprobe::suites;
use mcprobe::transport::DefaultTransportFactory;

use common::base_config;

fn seeded_config() -> CheckConfig {
    let mut config = base_config();
    config.timeouts.invoke_ms = 1_500;
    config.suites = SuiteSelection::Named(vec![
        "handshake".to_string(),
        "tool-discovery".to_string(),
        "tool-invocation".to_string(),
        "chaos-network".to_string(),
    ]);
    config.chaos = ChaosConfig {
        enable: true,
        seed: Some(12345),
        intensity: 0.5,
        network: Some(NetworkChaosConfig {
            delay_ms: None,
            drop_probability: 0.15,
            duplicate_probability: 0.2,
            reorder_probability: 0.1,
            corrupt_probability: 0.1,
        }),
        stream: None,
        protocol: None,
        timing: None,
    };
    config
}

async fn run_once() -> Vec<(String, String, CaseStatus)> {
    let config = seeded_config();
    config.validate().unwrap();

    let checker = Checker::new(config);
    checker.set_transport_factory(Arc::new(DefaultTransportFactory::new(
        checker.config().timeouts.clone(),
    )));
    checker.set_chaos_controller(Arc::new(ChaosController::from_config(
        &checker.config().chaos,
    )));
    suites::register_builtin(&checker);

    let results = checker.run(RunOptions::default()).await.unwrap();
    results
        .suites
        .iter()
        .flat_map(|suite| {
            suite
                .cases
                .iter()
                .map(|case| (suite.name.clone(), case.name.clone(), case.status))
        })
        .collect()
}

#[tokio::test]
async fn test_identical_seeds_yield_identical_case_statuses() {
    let first = run_once().await;
    let second = run_once().await;
    assert_eq!(
        first, second,
        "two runs with chaos.seed=12345 diverged in their verdicts"
    );
}

#[tokio::test]
async fn test_chaos_run_reports_seed_in_survivor_details() {
    let config = seeded_config();
    let checker = Checker::new(config);
    checker.set_transport_factory(Arc::new(DefaultTransportFactory::new(
        checker.config().timeouts.clone(),
    )));
    checker.set_chaos_controller(Arc::new(ChaosController::from_config(
        &checker.config().chaos,
    )));
    suites::register_builtin(&checker);

    let results = checker
        .run(RunOptions {
            suites: Some(vec!["chaos-network".to_string()]),
            ..RunOptions::default()
        })
        .await
        .unwrap();

    let suite = &results.suites[0];
    if suite.status == CaseStatus::Passed {
        let details = suite.cases[0].details.as_ref().unwrap();
        assert_eq!(details["seed"], 12345);
    }
}
