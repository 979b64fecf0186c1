//! mcprobe - MCP conformance and chaos-testing harness
//!
//! Main entry point. Loads the configuration, wires the checker with the
//! built-in suites and the default transport factory, runs the battery,
//! prints the results JSON, and exits with the conventional code:
//! 0 all passed, 1 failures, 2 configuration error, 3 target unreachable,
//! 4 internal error.

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcprobe::chaos::ChaosController;
use mcprobe::checker::Checker;
use mcprobe::cli::{Cli, Commands};
use mcprobe::config::{CheckConfig, RunOptions};
use mcprobe::error::CheckError;
use mcprobe::suites;
use mcprobe::transport::DefaultTransportFactory;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            err.downcast_ref::<CheckError>()
                .map_or(4, CheckError::exit_code)
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "mcprobe=debug" } else { "mcprobe=info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Suites => {
            for suite in suites::builtin_suites() {
                println!(
                    "{:<16} {:<10} [{}]  {}",
                    suite.name(),
                    suite.version(),
                    suite.tags().join(", "),
                    suite.description()
                );
            }
            Ok(0)
        }
        Commands::Check {
            config,
            suites: selected,
            tags,
            exclude_tags,
            fail_fast,
            strict,
            output,
        } => {
            let raw = std::fs::read_to_string(&config).map_err(|e| {
                CheckError::Config(format!("cannot read {}: {e}", config.display()))
            })?;
            let config: CheckConfig = serde_json::from_str(&raw)
                .map_err(|e| CheckError::Config(format!("invalid configuration: {e}")))?;
            config.validate()?;

            let checker = Checker::new(config);
            checker.set_transport_factory(Arc::new(DefaultTransportFactory::new(
                checker.config().timeouts.clone(),
            )));
            checker.set_chaos_controller(Arc::new(ChaosController::from_config(
                &checker.config().chaos,
            )));
            suites::register_builtin(&checker);

            let options = RunOptions {
                suites: if selected.is_empty() {
                    None
                } else {
                    Some(selected)
                },
                tags,
                exclude_tags,
                fail_fast,
                strict,
            };

            let results = checker.run(options).await?;
            let rendered = serde_json::to_string_pretty(&results)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    tracing::info!("results written to {}", path.display());
                }
                None => println!("{rendered}"),
            }

            let failed = results.summary.failed > 0
                || (strict && results.summary.warnings > 0);
            Ok(if failed { 1 } else { 0 })
        }
    }
}
