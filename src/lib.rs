//! mcprobe - MCP conformance and chaos-testing harness
//!
//! This library drives servers speaking the Model Context Protocol (a
//! JSON-RPC 2.0 dialect) through batteries of conformance suites, with an
//! optional deterministic fault-injection pipeline in the message path.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `transport`: line-framed JSON-RPC carriers (child-process stdio,
//!   framed TCP, WebSocket) behind one [`transport::Transport`] contract
//! - `chaos`: the seeded fault-injection pipeline and its plugins
//! - `mcp`: protocol wire types and the [`mcp::McpClient`] façade
//! - `checker`: the suite orchestrator, result model, and suite contract
//! - `suites`: the built-in conformance suites
//! - `config`: the configuration surface consumed from the outer CLI
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcprobe::checker::Checker;
//! use mcprobe::config::{CheckConfig, RunOptions, Target};
//! use mcprobe::transport::DefaultTransportFactory;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = CheckConfig::for_target(Target::Stdio {
//!         command: "node".into(),
//!         args: vec!["echo-server.js".into()],
//!         env: Default::default(),
//!         cwd: None,
//!         shell: false,
//!     });
//!     config.validate()?;
//!
//!     let checker = Checker::new(config);
//!     checker.set_transport_factory(Arc::new(DefaultTransportFactory::new(
//!         checker.config().timeouts.clone(),
//!     )));
//!     mcprobe::suites::register_builtin(&checker);
//!
//!     let results = checker.run(RunOptions::default()).await?;
//!     println!("{}", serde_json::to_string_pretty(&results)?);
//!     Ok(())
//! }
//! ```

pub mod chaos;
pub mod checker;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod suites;
pub mod transport;

// Re-export commonly used types
pub use checker::{Checker, CheckerEvent, TestResults};
pub use config::{CheckConfig, RunOptions, Target};
pub use error::{CheckError, Result};
pub use mcp::McpClient;
