//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all carriers satisfy.
//! Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`tcp::TcpTransport`] -- framed TCP socket, same newline-delimited
//!   JSON with partial-frame buffering.
//! - [`ws::WebsocketTransport`] -- one JSON value per WebSocket text frame.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! Every transport is a duplex carrier for opaque [`serde_json::Value`]
//! messages. One background reader task per transport drains the carrier,
//! decodes frames, pipes them through receive chaos, and fans the results
//! out to subscribers in arrival order. Writes flow through a single
//! writer task per transport, so a frame always reaches the wire whole.
//! Send chaos runs inside [`Transport::send`] under a per-transport lock,
//! immediately before the frame is handed to the writer.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected`, then
//! `-> Disconnected` on a clean close or `-> Error` on a fatal carrier
//! fault. A transport instance connects at most once; once closed it never
//! reopens.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chaos::{ChaosController, ChaosPayload, DuplicateSend};
use crate::config::Target;
use crate::error::{CheckError, Result};

pub mod factory;
pub mod stdio;
pub mod tcp;
pub mod ws;

#[cfg(test)]
pub mod fake;

pub use factory::{DefaultTransportFactory, TransportFactory};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// No carrier; the initial and final state
    Disconnected,
    /// Carrier establishment in progress
    Connecting,
    /// Carrier live; send and receive permitted
    Connected,
    /// A fatal carrier fault occurred
    Error,
    /// Graceful shutdown in progress
    Closing,
}

/// Snapshot of a transport's counters.
///
/// All values are monotonically non-decreasing within a connection.
/// `bytes_transferred` counts encoded bytes on the wire in both
/// directions, including framing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    /// Frames written to the carrier
    pub messages_sent: u64,
    /// Frames decoded from the carrier
    pub messages_received: u64,
    /// Encoded bytes moved in both directions
    pub bytes_transferred: u64,
    /// Wall-clock duration of the successful connect, in milliseconds
    pub connection_time_ms: u64,
}

/// Events observable by transport subscribers.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One decoded inbound frame, post receive-chaos
    Message(Value),
    /// A carrier error; fatal errors also move the state machine to
    /// [`TransportState::Error`]
    Error {
        /// Human-readable description
        message: String,
        /// Whether the carrier is unusable afterwards
        fatal: bool,
    },
    /// The carrier closed
    Closed {
        /// Whether the close was caused by a fault
        had_error: bool,
    },
}

/// Predicate over inbound messages, used by [`Transport::wait_for_message`].
pub type MessagePredicate<'a> = &'a (dyn Fn(&Value) -> bool + Send + Sync);

/// Abstraction over the three MCP carriers.
///
/// All implementations share the same contract: connect once, send opaque
/// JSON values, observe inbound traffic through [`Transport::subscribe`],
/// close gracefully. The chaos controller is attached through
/// [`Transport::set_chaos`]; the transport pipes every outbound message
/// through send chaos immediately before the carrier write and every
/// inbound frame through receive chaos immediately after decode.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Establish the carrier described by `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvalidTarget`] when the target variant does
    /// not match this transport, [`CheckError::ConnectTimeout`] when the
    /// carrier does not come up within the target's deadline, and
    /// [`CheckError::Connect`] for carrier-level failures or when the
    /// transport was already connected.
    async fn connect(&self, target: &Target) -> Result<()>;

    /// Serialize `message`, apply send chaos, add framing, and write it.
    ///
    /// Does not wait for any reply. Sends are serialised: concurrent
    /// callers never interleave on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::NotConnected`] unless the state is
    /// `Connected`, and [`CheckError::Send`] for write failures (including
    /// chaos-simulated aborts).
    async fn send(&self, message: Value) -> Result<()>;

    /// Gracefully shut the carrier down and move to `Disconnected`.
    ///
    /// Safe to call on a never-connected or already-closed instance (both
    /// are no-ops). Outstanding duplicate timers are discarded.
    async fn close(&self) -> Result<()>;

    /// Observe the transport's event stream from this point on.
    ///
    /// Every subscriber sees the same events in the same order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Current lifecycle state.
    fn state(&self) -> TransportState;

    /// Snapshot of the transport's counters.
    fn stats(&self) -> TransportStats;

    /// Attach the chaos controller used by the send/receive hook points.
    fn set_chaos(&self, chaos: Arc<ChaosController>);

    /// Resolve with the first inbound message satisfying `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::WaitTimeout`] when no matching message
    /// arrives within `timeout` (a zero timeout fails immediately), and
    /// [`CheckError::NotConnected`] when the transport closes while
    /// waiting.
    async fn wait_for_message(
        &self,
        predicate: MessagePredicate<'_>,
        timeout: Duration,
    ) -> Result<Value> {
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(CheckError::WaitTimeout(timeout.as_millis() as u64).into());
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Err(_) => {
                    return Err(CheckError::WaitTimeout(timeout.as_millis() as u64).into());
                }
                Ok(None) => {
                    return Err(CheckError::NotConnected(
                        "transport closed while waiting for a message".into(),
                    )
                    .into());
                }
                Ok(Some(TransportEvent::Message(value))) if predicate(&value) => {
                    return Ok(value);
                }
                Ok(Some(_)) => continue,
            }
        }
    }
}

/// State, counters, subscriber fan-out, and chaos wiring shared by every
/// transport implementation.
#[derive(Debug)]
pub(crate) struct TransportCore {
    label: &'static str,
    state: Mutex<TransportState>,
    ever_connected: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    chaos: Mutex<Option<Arc<ChaosController>>>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_transferred: AtomicU64,
    connection_time_ms: AtomicU64,
    cancel: CancellationToken,
}

impl TransportCore {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(TransportState::Disconnected),
            ever_connected: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            chaos: Mutex::new(None),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            connection_time_ms: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn state(&self) -> TransportState {
        *self.state.lock().expect("transport state poisoned")
    }

    pub(crate) fn set_state(&self, next: TransportState) {
        *self.state.lock().expect("transport state poisoned") = next;
    }

    /// Guard the one-connect-per-instance rule and enter `Connecting`.
    pub(crate) fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.lock().expect("transport state poisoned");
        if self.ever_connected.swap(true, Ordering::SeqCst) {
            return Err(CheckError::Connect(format!(
                "{} transport already used; create a new instance",
                self.label
            ))
            .into());
        }
        *state = TransportState::Connecting;
        Ok(())
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn set_chaos(&self, chaos: Arc<ChaosController>) {
        *self.chaos.lock().expect("chaos slot poisoned") = Some(chaos);
    }

    pub(crate) fn chaos(&self) -> Option<Arc<ChaosController>> {
        self.chaos.lock().expect("chaos slot poisoned").clone()
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(tx);
        rx
    }

    /// Fan an event out to every live subscriber, in registration order.
    pub(crate) fn emit(&self, event: &TransportEvent) {
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_transferred
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_connected(&self, elapsed: Duration) {
        self.connection_time_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.set_state(TransportState::Connected);
    }

    pub(crate) fn stats(&self) -> TransportStats {
        TransportStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            connection_time_ms: self.connection_time_ms.load(Ordering::Relaxed),
        }
    }

    /// Count inbound carrier bytes that never reach the decoder (for
    /// example ignored WebSocket binary frames).
    pub(crate) fn record_inbound_bytes(&self, bytes: usize) {
        self.bytes_transferred
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Decode one raw frame: count its bytes, parse, apply receive chaos,
    /// and fan the message out. A frame that fails to parse surfaces as a
    /// non-fatal error event and the stream continues.
    pub(crate) async fn dispatch_frame(&self, raw: &str, framed_len: usize) {
        self.record_inbound_bytes(framed_len);

        match self.state() {
            TransportState::Disconnected | TransportState::Error => return,
            _ => {}
        }

        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    target: "mcprobe::transport",
                    transport = self.label,
                    "failed to decode inbound frame: {e}"
                );
                self.emit(&TransportEvent::Error {
                    message: format!("parse error: {e}"),
                    fatal: false,
                });
                return;
            }
        };

        let value = match self.chaos() {
            Some(chaos) => chaos.apply_receive_chaos(value).await,
            None => value,
        };

        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.emit(&TransportEvent::Message(value));
    }

    /// Record a fatal carrier fault.
    pub(crate) fn fail(&self, message: String) {
        tracing::error!(
            target: "mcprobe::transport",
            transport = self.label,
            "{message}"
        );
        self.emit(&TransportEvent::Error {
            message,
            fatal: true,
        });
        self.set_state(TransportState::Error);
    }

    /// Record carrier closure, once. Later calls are no-ops so an explicit
    /// `close()` racing the reader's EOF does not emit twice.
    pub(crate) fn mark_closed(&self, had_error: bool) {
        {
            let mut state = self.state.lock().expect("transport state poisoned");
            match *state {
                TransportState::Disconnected | TransportState::Error => return,
                _ => {
                    *state = if had_error {
                        TransportState::Error
                    } else {
                        TransportState::Disconnected
                    };
                }
            }
        }
        self.cancel.cancel();
        self.emit(&TransportEvent::Closed { had_error });
    }
}

/// Run an outbound message through send chaos and encode the surviving
/// payload as frame text (without carrier framing).
///
/// Returns `None` when chaos dropped the message. Chaos-simulated aborts
/// surface as [`CheckError::Send`].
pub(crate) async fn encode_outbound(
    core: &TransportCore,
    message: &Value,
) -> Result<(Option<String>, Vec<DuplicateSend>)> {
    let Some(chaos) = core.chaos() else {
        return Ok((Some(message.to_string()), Vec::new()));
    };

    let verdict = chaos.apply_send_chaos(message).await.map_err(|err| {
        match err.downcast_ref::<CheckError>() {
            Some(CheckError::ChaosAbort(plugin)) => {
                CheckError::Send(format!("simulated connection abort (plugin {plugin})"))
            }
            _ => CheckError::Send(err.to_string()),
        }
    })?;

    let text = verdict.payload.map(|payload| match payload {
        ChaosPayload::Json(value) => value.to_string(),
        ChaosPayload::Raw(raw) => raw,
    });
    Ok((text, verdict.duplicates))
}

/// One frame handed to a transport's writer task.
///
/// `ack` is present for caller-visible sends (errors propagate back as
/// [`CheckError::Send`]) and absent for chaos-scheduled duplicates, whose
/// failures are only logged.
pub(crate) struct WriteOp {
    pub(crate) frame: String,
    pub(crate) ack: Option<tokio::sync::oneshot::Sender<std::result::Result<(), String>>>,
}

/// Shared send path: serialise under the per-transport lock, run send
/// chaos, frame the surviving payload, and hand it to the writer task.
///
/// `newline` selects line framing (stdio, TCP) versus bare text frames
/// (WebSocket). Duplicates returned by chaos are scheduled after the main
/// write and bypass chaos entirely.
pub(crate) async fn send_with_chaos(
    core: &Arc<TransportCore>,
    send_lock: &tokio::sync::Mutex<()>,
    outbound: mpsc::UnboundedSender<WriteOp>,
    message: &Value,
    newline: bool,
) -> Result<()> {
    let guard = send_lock.lock().await;
    if core.state() != TransportState::Connected {
        return Err(CheckError::NotConnected(format!(
            "{} transport is not connected",
            core.label
        ))
        .into());
    }

    let (text, duplicates) = encode_outbound(core, message).await?;
    if let Some(text) = text {
        let frame = if newline { format!("{text}\n") } else { text };
        let (ack_tx, ack_rx) = tokio::sync::oneshot::channel();
        outbound
            .send(WriteOp {
                frame,
                ack: Some(ack_tx),
            })
            .map_err(|_| CheckError::Send("writer task stopped".into()))?;
        match ack_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(CheckError::Send(e).into()),
            Err(_) => {
                return Err(CheckError::Send("writer task dropped the write".into()).into());
            }
        }
    } else {
        tracing::debug!(
            target: "mcprobe::transport",
            transport = core.label,
            "outbound message dropped by chaos"
        );
    }
    drop(guard);

    schedule_duplicates(core, outbound, duplicates, newline);
    Ok(())
}

/// Spawn one cancellable timer per chaos duplicate. On expiry the
/// duplicate re-enters the writer task directly, bypassing chaos; closing
/// the transport cancels outstanding timers and suppresses their writes.
pub(crate) fn schedule_duplicates(
    core: &Arc<TransportCore>,
    outbound: mpsc::UnboundedSender<WriteOp>,
    duplicates: Vec<DuplicateSend>,
    newline: bool,
) {
    for duplicate in duplicates {
        let cancel = core.cancel_token();
        let outbound = outbound.clone();
        let core = Arc::clone(core);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(duplicate.delay) => {
                    if core.state() == TransportState::Connected {
                        let text = duplicate.message.to_string();
                        let frame = if newline { format!("{text}\n") } else { text };
                        let _ = outbound.send(WriteOp { frame, ack: None });
                    }
                }
            }
        });
    }
}

/// Single-writer task for byte-stream carriers (stdio, TCP). Frames are
/// written whole and flushed; counters update only on success. The task
/// ends when every sender is dropped, releasing the write half.
pub(crate) fn spawn_stream_writer<W>(
    core: Arc<TransportCore>,
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) -> tokio::task::JoinHandle<()>
where
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    use tokio::io::AsyncWriteExt;

    tokio::spawn(async move {
        while let Some(op) = rx.recv().await {
            let result = async {
                writer.write_all(op.frame.as_bytes()).await?;
                writer.flush().await
            }
            .await;
            match result {
                Ok(()) => {
                    core.record_sent(op.frame.len());
                    if let Some(ack) = op.ack {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) => {
                    let message = format!("write failed: {e}");
                    tracing::warn!(
                        target: "mcprobe::transport",
                        transport = core.label,
                        "{message}"
                    );
                    if let Some(ack) = op.ack {
                        let _ = ack.send(Err(message));
                    }
                }
            }
        }
    })
}
