//! In-process fake transport used by unit tests
//!
//! Records everything sent and lets tests script the peer: a responder
//! closure maps each outbound message to zero or more inbound replies,
//! and [`FakeTransport::inject`] pushes unsolicited messages (for
//! notification paths). The chaos pipeline, statistics, and event fan-out
//! run exactly as they do on real carriers.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::chaos::ChaosController;
use crate::config::Target;
use crate::error::{CheckError, Result};
use crate::transport::{
    encode_outbound, Transport, TransportCore, TransportEvent, TransportState, TransportStats,
};

type Responder = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// Scriptable in-memory transport.
pub struct FakeTransport {
    core: Arc<TransportCore>,
    send_lock: tokio::sync::Mutex<()>,
    sent: Mutex<Vec<Value>>,
    raw_sent: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl FakeTransport {
    /// Create an unconnected fake.
    pub fn new() -> Self {
        Self {
            core: Arc::new(TransportCore::new("fake")),
            send_lock: tokio::sync::Mutex::new(()),
            sent: Mutex::new(Vec::new()),
            raw_sent: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        }
    }

    /// Create a fake that is already connected.
    pub fn connected() -> Arc<Self> {
        let fake = Arc::new(Self::new());
        fake.core.begin_connect().expect("fresh fake");
        fake.core.record_connected(std::time::Duration::ZERO);
        fake
    }

    /// Script the peer: every outbound message is passed to `responder`
    /// and each returned value is delivered back as an inbound message.
    pub fn respond_with(&self, responder: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static) {
        *self.responder.lock().expect("responder poisoned") = Some(Box::new(responder));
    }

    /// Deliver an unsolicited inbound message.
    pub async fn inject(&self, message: Value) {
        self.core.dispatch_frame(&message.to_string(), 0).await;
    }

    /// Everything sent so far, in order, as parsed values.
    pub fn sent_messages(&self) -> Vec<Value> {
        self.sent.lock().expect("sent list poisoned").clone()
    }

    /// Raw frame texts, including chaos-corrupted ones that no longer
    /// parse as JSON.
    pub fn raw_frames(&self) -> Vec<String> {
        self.raw_sent.lock().expect("raw list poisoned").clone()
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _target: &Target) -> Result<()> {
        self.core.begin_connect()?;
        self.core.record_connected(std::time::Duration::ZERO);
        Ok(())
    }

    async fn send(&self, message: Value) -> Result<()> {
        let _guard = self.send_lock.lock().await;
        if self.core.state() != TransportState::Connected {
            return Err(CheckError::NotConnected("fake transport is not connected".into()).into());
        }

        let (text, duplicates) = encode_outbound(&self.core, &message).await?;
        let mut delivered = Vec::new();
        if let Some(text) = text {
            self.core.record_sent(text.len() + 1);
            self.raw_sent
                .lock()
                .expect("raw list poisoned")
                .push(text.clone());
            if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                self.sent
                    .lock()
                    .expect("sent list poisoned")
                    .push(parsed.clone());
                delivered.push(parsed);
            }
        }
        // Duplicates bypass chaos and are delivered immediately.
        for duplicate in duplicates {
            self.core.record_sent(duplicate.message.to_string().len() + 1);
            self.sent
                .lock()
                .expect("sent list poisoned")
                .push(duplicate.message.clone());
            delivered.push(duplicate.message);
        }

        let responses: Vec<Value> = {
            let responder = self.responder.lock().expect("responder poisoned");
            responder
                .as_ref()
                .map(|r| delivered.iter().flat_map(|m| r(m)).collect())
                .unwrap_or_default()
        };
        for response in responses {
            self.core.dispatch_frame(&response.to_string(), 0).await;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_responder_round_trip() {
        let fake = FakeTransport::connected();
        fake.respond_with(|msg| {
            vec![json!({"jsonrpc": "2.0", "id": msg["id"], "result": "pong"})]
        });

        fake.send(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .await
            .unwrap();

        let reply = fake
            .wait_for_message(&|v| v["id"] == 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply["result"], "pong");
        assert_eq!(fake.sent_messages().len(), 1);
    }

    #[tokio::test]
    async fn test_inject_delivers_notification() {
        let fake = FakeTransport::connected();
        let mut rx = fake.subscribe();
        fake.inject(json!({"jsonrpc": "2.0", "method": "notifications/progress"}))
            .await;
        match rx.try_recv().unwrap() {
            TransportEvent::Message(v) => assert_eq!(v["method"], "notifications/progress"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_close_stops_message_delivery() {
        let fake = FakeTransport::connected();
        let mut rx = fake.subscribe();
        fake.close().await.unwrap();
        fake.inject(json!({"id": 1})).await;

        // The Closed event arrives; no message follows it.
        assert!(matches!(
            rx.try_recv().unwrap(),
            TransportEvent::Closed { had_error: false }
        ));
        assert!(rx.try_recv().is_err());
        assert!(fake.send(json!({"id": 2})).await.is_err());
    }
}
