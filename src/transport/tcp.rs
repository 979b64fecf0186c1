//! Framed TCP transport
//!
//! Dials a TCP socket and exchanges newline-delimited JSON, exactly like
//! the stdio carrier. Inbound bytes are buffered by a
//! [`tokio_util::codec::LinesCodec`]: every `\n` completes a frame, and
//! partial frames persist across reads, so a frame split over any number
//! of TCP segments decodes exactly once.
//!
//! TLS for raw TCP targets is not terminated here; `tls: true` is
//! rejected at connect time. WebSocket targets get TLS via `wss://`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::chaos::ChaosController;
use crate::config::Target;
use crate::error::{CheckError, Result};
use crate::transport::{
    send_with_chaos, spawn_stream_writer, Transport, TransportCore, TransportEvent,
    TransportState, TransportStats, WriteOp,
};

/// TCP socket transport speaking newline-delimited JSON.
#[derive(Debug)]
pub struct TcpTransport {
    core: Arc<TransportCore>,
    send_lock: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
}

impl TcpTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            core: Arc::new(TransportCore::new("tcp")),
            send_lock: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
        }
    }

    fn outbound_sender(&self) -> Result<mpsc::UnboundedSender<WriteOp>> {
        self.outbound
            .lock()
            .expect("outbound slot poisoned")
            .clone()
            .ok_or_else(|| CheckError::NotConnected("tcp transport is not connected".into()).into())
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, target: &Target) -> Result<()> {
        let Target::Tcp {
            host, port, tls, ..
        } = target
        else {
            return Err(CheckError::InvalidTarget(format!(
                "tcp transport cannot serve a {} target",
                target.kind()
            ))
            .into());
        };

        if *tls {
            return Err(CheckError::Connect(
                "raw-TCP TLS is not supported; terminate TLS in front of the target or use a wss:// websocket target".into(),
            )
            .into());
        }

        self.core.begin_connect()?;
        let started = Instant::now();

        if let Some(chaos) = self.core.chaos() {
            chaos.during_connection().await;
        }

        let timeout_ms = target.connect_timeout_ms();
        let stream = match tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            TcpStream::connect((host.as_str(), *port)),
        )
        .await
        {
            Err(_) => {
                self.core.set_state(TransportState::Error);
                return Err(CheckError::ConnectTimeout {
                    timeout_ms,
                    target: target.describe(),
                }
                .into());
            }
            Ok(Err(e)) => {
                self.core.set_state(TransportState::Error);
                return Err(
                    CheckError::Connect(format!("tcp connect to {host}:{port} failed: {e}")).into(),
                );
            }
            Ok(Ok(stream)) => stream,
        };

        let (read_half, write_half) = stream.into_split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<WriteOp>();
        spawn_stream_writer(Arc::clone(&self.core), write_half, outbound_rx);

        // Reader: LinesCodec buffers partial frames across segments.
        let core = Arc::clone(&self.core);
        let cancel = self.core.cancel_token();
        tokio::spawn(async move {
            let mut frames = FramedRead::new(read_half, LinesCodec::new());
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = frames.next() => match next {
                        Some(Ok(line)) => core.dispatch_frame(&line, line.len() + 1).await,
                        Some(Err(e)) => {
                            core.fail(format!("tcp read failed: {e}"));
                            break;
                        }
                        None => {
                            core.mark_closed(false);
                            break;
                        }
                    }
                }
            }
        });

        *self.outbound.lock().expect("outbound slot poisoned") = Some(outbound_tx);
        self.core.record_connected(started.elapsed());

        tracing::debug!(
            target: "mcprobe::transport::tcp",
            %host,
            port,
            "tcp target connected"
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

        // Dropping the last sender ends the writer task, which drops the
        // write half and sends FIN (half-close).
        self.outbound.lock().expect("outbound slot poisoned").take();

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
