//! Shared helpers for integration tests

use std::collections::HashMap;
use std::path::PathBuf;

use mcprobe::config::{CheckConfig, Target};

/// Returns the path to the `conformance_target` binary.
///
/// Cargo sets `CARGO_BIN_EXE_conformance_target` automatically when
/// running integration tests in the same package. Falls back to the
/// `target/debug` directory for manual runs.
pub fn conformance_target_exe() -> PathBuf {
    if let Ok(p) = std::env::var("CARGO_BIN_EXE_conformance_target") {
        return PathBuf::from(p);
    }

    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("conformance_target");
        if debug.exists() {
            return debug;
        }
    }

    PathBuf::from("conformance_target")
}

/// A stdio target launching the conformance server.
pub fn stdio_target() -> Target {
    Target::Stdio {
        command: conformance_target_exe().to_string_lossy().into_owned(),
        args: vec![],
        env: HashMap::new(),
        cwd: None,
        shell: false,
    }
}

/// Configuration with test-friendly timeouts against the stdio target.
pub fn base_config() -> CheckConfig {
    let mut config = CheckConfig::for_target(stdio_target());
    config.timeouts.connect_ms = 5_000;
    config.timeouts.invoke_ms = 2_000;
    config.timeouts.shutdown_ms = 1_000;
    config.timeouts.stream_ms = 5_000;
    config
}
