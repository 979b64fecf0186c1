//! WebSocket transport
//!
//! One JSON value per text frame; no additional line framing. Binary
//! frames are ignored with a warning (their bytes still count toward the
//! transfer statistics). TLS is available through `wss://` URLs via
//! rustls.
//!
//! Graceful shutdown sends a Close frame with code 1000 (normal closure)
//! before tearing the carrier down.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::chaos::ChaosController;
use crate::config::Target;
use crate::error::{CheckError, Result};
use crate::transport::{
    send_with_chaos, Transport, TransportCore, TransportEvent, TransportState, TransportStats,
    WriteOp,
};

/// WebSocket transport speaking one JSON value per text frame.
#[derive(Debug)]
pub struct WebsocketTransport {
    core: Arc<TransportCore>,
    send_lock: tokio::sync::Mutex<()>,
    outbound: Mutex<Option<mpsc::UnboundedSender<WriteOp>>>,
}

impl WebsocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            core: Arc::new(TransportCore::new("websocket")),
            send_lock: tokio::sync::Mutex::new(()),
            outbound: Mutex::new(None),
        }
    }

    fn outbound_sender(&self) -> Result<mpsc::UnboundedSender<WriteOp>> {
        self.outbound
            .lock()
            .expect("outbound slot poisoned")
            .clone()
            .ok_or_else(|| {
                CheckError::NotConnected("websocket transport is not connected".into()).into()
            })
    }
}

impl Default for WebsocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebsocketTransport {
    async fn connect(&self, target: &Target) -> Result<()> {
        let Target::Websocket {
            url,
            headers,
            protocols,
        } = target
        else {
            return Err(CheckError::InvalidTarget(format!(
                "websocket transport cannot serve a {} target",
                target.kind()
            ))
            .into());
        };

        self.core.begin_connect()?;
        let started = Instant::now();

        if let Some(chaos) = self.core.chaos() {
            chaos.during_connection().await;
        }

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| CheckError::Connect(format!("invalid websocket url {url}: {e}")))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CheckError::Connect(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CheckError::Connect(format!("invalid header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }
        if !protocols.is_empty() {
            let joined = protocols.join(", ");
            request.headers_mut().insert(
                "Sec-WebSocket-Protocol",
                HeaderValue::from_str(&joined)
                    .map_err(|e| CheckError::Connect(format!("invalid subprotocol list: {e}")))?,
            );
        }

        let timeout_ms = target.connect_timeout_ms();
        let (stream, _response) = match tokio::time::timeout(
            std::time::Duration::from_millis(timeout_ms),
            connect_async(request),
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
                    CheckError::Connect(format!("websocket handshake with {url} failed: {e}"))
                        .into(),
                );
            }
            Ok(Ok(pair)) => pair,
        };

        let (mut sink, mut inbound) = stream.split();

        // Writer: text frames while the channel lives, then Close(1000).
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WriteOp>();
        let core = Arc::clone(&self.core);
        tokio::spawn(async move {
            while let Some(op) = outbound_rx.recv().await {
                let frame_len = op.frame.len();
                match sink.send(WsMessage::Text(op.frame)).await {
                    Ok(()) => {
                        core.record_sent(frame_len);
                        if let Some(ack) = op.ack {
                            let _ = ack.send(Ok(()));
                        }
                    }
                    Err(e) => {
                        let message = format!("websocket write failed: {e}");
                        tracing::warn!(target: "mcprobe::transport::ws", "{message}");
                        if let Some(ack) = op.ack {
                            let _ = ack.send(Err(message));
                        }
                    }
                }
            }
            let _ = sink
                .send(WsMessage::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })))
                .await;
            let _ = sink.close().await;
        });

        // Reader: one JSON value per text frame.
        let core = Arc::clone(&self.core);
        let cancel = self.core.cancel_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = inbound.next() => match next {
                        Some(Ok(WsMessage::Text(text))) => {
                            let len = text.len();
                            core.dispatch_frame(&text, len).await;
                        }
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            core.record_inbound_bytes(bytes.len());
                            tracing::warn!(
                                target: "mcprobe::transport::ws",
                                bytes = bytes.len(),
                                "ignoring binary websocket frame"
                            );
                        }
                        Some(Ok(WsMessage::Close(_))) => {
                            core.mark_closed(false);
                            break;
                        }
                        // Pings and pongs are carrier keepalive, not messages.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            core.fail(format!("websocket read failed: {e}"));
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

        tracing::debug!(target: "mcprobe::transport::ws", %url, "websocket target connected");
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        let outbound = self.outbound_sender()?;
        send_with_chaos(&self.core, &self.send_lock, outbound, &message, false).await
    }

    async fn close(&self) -> Result<()> {
        match self.core.state() {
            TransportState::Disconnected | TransportState::Error => return Ok(()),
            _ => {}
        }
        self.core.set_state(TransportState::Closing);

        // Dropping the last sender ends the writer task, which emits the
        // Close frame with code 1000 on its way out.
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
