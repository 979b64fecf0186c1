//! MCP protocol types and the client façade
//!
//! - [`types`] -- JSON-RPC 2.0 primitives and the MCP wire types the
//!   harness exchanges with targets (tools, resources, prompts).
//! - [`client`] -- [`client::McpClient`], a thin JSON-RPC client bound to
//!   a [`crate::transport::Transport`] that suites drive targets through.

pub mod client;
pub mod types;

pub use client::McpClient;
