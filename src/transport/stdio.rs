//! Stdio transport for child-process targets
//!
//! Spawns the target as a child process and exchanges newline-delimited
//! JSON over its stdin/stdout pipes. This is the standard carrier for
//! locally-installed MCP servers.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound messages are read from the child's stdout, one JSON object
//!   per line (newline stripped before decode).
//! - The child's stderr is logged via `tracing::debug!` and never decoded.
//!
//! # Lifecycle
//!
//! [`StdioTransport::connect`] spawns the child and starts three
//! background tasks: a stdout reader, a stderr drain, and the single
//! writer. [`StdioTransport::close`] drops the child's stdin, waits up to
//! the configured shutdown grace for a voluntary exit, then escalates to
//! SIGTERM and finally SIGKILL. Dropping the transport sends a
//! best-effort SIGTERM.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::chaos::ChaosController;
use crate::config::Target;
use crate::error::{CheckError, Result};
use crate::transport::{
    send_with_chaos, spawn_stream_writer, Transport, TransportCore, TransportEvent,
    TransportState, TransportStats, WriteOp,
};

/// Child-process transport speaking newline-delimited JSON.
#[derive(Debug)]
pub struct StdioTransport {
    core: Arc<TransportCore>,
    shutdown_ms: u64,
    send_lock: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
}

impl StdioTransport {
    /// Create an unconnected transport.
    ///
    /// `shutdown_ms` is the grace period between closing the child's stdin
    /// and escalating to signals during [`Transport::close`].
    pub fn new(shutdown_ms: u64) -> Self {
        Self {
            core: Arc::new(TransportCore::new("stdio")),
            shutdown_ms,
            send_lock: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
            child: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    fn outbound_sender(&self) -> Result<mpsc::UnboundedSender<WriteOp>> {
        self.outbound
            .lock()
            .expect("outbound slot poisoned")
            .clone()
            .ok_or_else(|| CheckError::NotConnected("stdio transport is not connected".into()).into())
    }

    fn build_command(command: &str, args: &[String], shell: bool) -> Command {
        if shell {
            let joined = std::iter::once(command.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            #[cfg(unix)]
            {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(joined);
                cmd
            }
            #[cfg(not(unix))]
            {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(joined);
                cmd
            }
        } else {
            let mut cmd = Command::new(command);
            cmd.args(args);
            cmd
        }
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self, target: &Target) -> Result<()> {
        let Target::Stdio {
            command,
            args,
            env,
            cwd,
            shell,
        } = target
        else {
            return Err(CheckError::InvalidTarget(format!(
                "stdio transport cannot serve a {} target",
                target.kind()
            ))
            .into());
        };

        self.core.begin_connect()?;
        let started = Instant::now();

        if let Some(chaos) = self.core.chaos() {
            chaos.during_connection().await;
        }

        let mut cmd = Self::build_command(command, args, *shell);
        cmd.envs(env);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            self.core.set_state(TransportState::Error);
            CheckError::Connect(format!("failed to spawn `{command}`: {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CheckError::Connect("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CheckError::Connect("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CheckError::Connect("child stderr unavailable after spawn".into()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WriteOp>();
        spawn_stream_writer(Arc::clone(&self.core), stdin, outbound_rx);

        // Stdout reader: one JSON frame per line.
        let core = Arc::clone(&self.core);
        let cancel = self.core.cancel_token();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => core.dispatch_frame(&line, line.len() + 1).await,
                        Ok(None) => {
                            core.mark_closed(false);
                            break;
                        }
                        Err(e) => {
                            core.fail(format!("stdout read failed: {e}"));
                            break;
                        }
                    }
                }
            }
        });

        // Stderr drain: diagnostic only, never decoded.
        let cancel = self.core.cancel_token();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            tracing::debug!(
                                target: "mcprobe::transport::stdio",
                                "target stderr: {line}"
                            );
                        }
                        _ => break,
                    }
                }
            }
        });

        *self.outbound.lock().expect("outbound slot poisoned") = Some(outbound_tx);
        *self.child.lock().await = Some(child);
        self.core.record_connected(started.elapsed());

        tracing::debug!(
            target: "mcprobe::transport::stdio",
            command = %command,
            "stdio target connected"
        );
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        let outbound = self.outbound_sender()?;
        send_with_chaos(&self.core, &self.send_lock, outbound, &message, true).await
    }

    async fn close(&self) -> Result<()> {
        match self.core.state() {
            TransportState::Disconnected | TransportState::Error => return Ok(()),
            _ => {}
        }
        self.core.set_state(TransportState::Closing);

        // Cancel outstanding duplicate timers first: they hold cloned
        // senders, and the writer task (and with it the child's stdin)
        // only goes away once every sender is dropped.
        self.core.cancel_token().cancel();
        self.outbound.lock().expect("outbound slot poisoned").take();

        if let Some(mut child) = self.child.lock().await.take() {
            let graceful =
                tokio::time::timeout(Duration::from_millis(self.shutdown_ms), child.wait()).await;
            if graceful.is_err() {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    // SAFETY: pid came from a live tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
                let after_term =
                    tokio::time::timeout(Duration::from_millis(200), child.wait()).await;
                if after_term.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            }
        }

        self.core.mark_closed(false);
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        self.core.subscribe()
    }

    fn state(&self) -> TransportState {
        self.core.state()
    }

    fn stats(&self) -> TransportStats {
        self.core.stats()
    }

    fn set_chaos(&self, chaos: Arc<ChaosController>) {
        self.core.set_chaos(chaos);
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    // SAFETY: pid came from a live tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = child.start_kill();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn cat_target() -> Target {
        Target::Stdio {
            command: "cat".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            shell: false,
        }
    }

    #[tokio::test]
    async fn test_connect_nonexistent_command_fails_with_connect_error() {
        let transport = StdioTransport::new(500);
        let target = Target::Stdio {
            command: "/nonexistent/binary/that/does/not/exist".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            shell: false,
        };
        let err = transport.connect(&target).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_mismatched_target() {
        let transport = StdioTransport::new(500);
        let target = Target::Tcp {
            host: "localhost".to_string(),
            port: 4444,
            tls: false,
            timeout_ms: None,
        };
        let err = transport.connect(&target).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::InvalidTarget(_))
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails_not_connected() {
        let transport = StdioTransport::new(500);
        let err = transport.send(json!({"id": 1})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_close_never_connected_is_noop() {
        let transport = StdioTransport::new(500);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_echo_round_trip_through_cat() {
        let transport = StdioTransport::new(500);
        if transport.connect(&cat_target()).await.is_err() {
            return; // `cat` unavailable in this environment
        }

        let msg = json!({"jsonrpc": "2.0", "id": 1, "method": "ping", "params": {}});
        transport.send(msg.clone()).await.unwrap();

        let received = transport
            .wait_for_message(&|v| v.get("id").is_some(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(received, msg);

        let stats = transport.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_received, 1);
        assert!(stats.bytes_transferred > 0);

        transport.close().await.unwrap();
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_after_close_fails_not_connected() {
        let transport = StdioTransport::new(500);
        if transport.connect(&cat_target()).await.is_err() {
            return;
        }
        transport.close().await.unwrap();

        let err = transport.send(json!({"id": 2})).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_second_connect_fails() {
        let transport = StdioTransport::new(500);
        if transport.connect(&cat_target()).await.is_err() {
            return;
        }
        let err = transport.connect(&cat_target()).await.unwrap_err();
        assert!(err.to_string().contains("already used"));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_message_zero_timeout_fails_immediately() {
        let transport = StdioTransport::new(500);
        if transport.connect(&cat_target()).await.is_err() {
            return;
        }
        let err = transport
            .wait_for_message(&|_| true, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CheckError>(),
            Some(CheckError::WaitTimeout(0))
        ));
        transport.close().await.unwrap();
    }
}
