//! Transport factory: strategy dispatch from target kind to carrier

use std::sync::Arc;

use crate::config::{TargetKind, Timeouts};
use crate::error::{CheckError, Result};
use crate::transport::{stdio::StdioTransport, tcp::TcpTransport, ws::WebsocketTransport, Transport};

/// Creates transports for target kinds.
///
/// The checker never instantiates concrete transports; it asks its
/// configured factory, which makes the carrier set pluggable in tests and
/// embeddings.
pub trait TransportFactory: Send + Sync {
    /// Create a fresh, unconnected transport for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError::InvalidTarget`] when the kind is unsupported.
    fn create(&self, kind: TargetKind) -> Result<Arc<dyn Transport>>;

    /// Whether this factory can produce a transport for `kind`.
    fn supports(&self, kind: TargetKind) -> bool;
}

/// Factory producing the three built-in transports.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransportFactory {
    timeouts: Timeouts,
}

impl DefaultTransportFactory {
    /// Create a factory; `timeouts` supplies carrier-level knobs such as
    /// the stdio shutdown grace period.
    pub fn new(timeouts: Timeouts) -> Self {
        Self { timeouts }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, kind: TargetKind) -> Result<Arc<dyn Transport>> {
        match kind {
            TargetKind::Stdio => Ok(Arc::new(StdioTransport::new(self.timeouts.shutdown_ms))),
            TargetKind::Tcp => Ok(Arc::new(TcpTransport::new())),
            TargetKind::Websocket => Ok(Arc::new(WebsocketTransport::new())),
        }
    }

    fn supports(&self, _kind: TargetKind) -> bool {
        true
    }
}
