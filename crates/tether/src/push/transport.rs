//! Transport seam between push channels and the network.
//!
//! A [`Transport`] opens one server-push connection and reports what happens
//! on it as [`TransportEvent`]s, each stamped with the [`ChannelKey`] it was
//! opened for, onto a shared signal bus. The bus is drained by a single owner
//! (normally the session manager), which is the only place channel state is
//! mutated.

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::state::ChannelKey;
use crate::credential::Credential;

/// Something that happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed; the server is streaming.
    Opened,
    /// One named message.
    Frame { kind: String, data: String },
    /// The connection failed or ended.
    Failed { reason: String },
    /// A scheduled reconnect delay elapsed.
    RetryDue,
}

/// A transport event addressed to one channel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSignal {
    pub key: ChannelKey,
    pub event: TransportEvent,
}

pub type SignalSender = mpsc::UnboundedSender<ChannelSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<ChannelSignal>;

/// Create a signal bus.
pub fn signal_bus() -> (SignalSender, SignalReceiver) {
    mpsc::unbounded_channel()
}

/// Write end of the bus, bound to one connection's key.
#[derive(Debug, Clone)]
pub struct SignalSink {
    key: ChannelKey,
    tx: SignalSender,
}

impl SignalSink {
    pub fn new(key: ChannelKey, tx: SignalSender) -> Self {
        Self { key, tx }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Report the handshake. Returns false once the bus is gone.
    pub fn opened(&self) -> bool {
        self.send(TransportEvent::Opened)
    }

    pub fn frame(&self, kind: impl Into<String>, data: impl Into<String>) -> bool {
        self.send(TransportEvent::Frame {
            kind: kind.into(),
            data: data.into(),
        })
    }

    pub fn failed(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Failed {
            reason: reason.into(),
        })
    }

    pub(crate) fn retry_due(&self) -> bool {
        self.send(TransportEvent::RetryDue)
    }

    fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ChannelSignal {
                key: self.key.clone(),
                event,
            })
            .is_ok()
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub credential: Credential,
}

/// Absolute stream URL template containing an `{id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    template: String,
}

impl StreamEndpoint {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// URL for `id`, percent-encoded.
    pub fn url_for(&self, id: &str) -> String {
        self.template.replace("{id}", &urlencoding::encode(id))
    }

    pub fn request(&self, id: &str, credential: &Credential) -> ConnectRequest {
        ConnectRequest {
            url: self.url_for(id),
            credential: credential.clone(),
        }
    }
}

/// Opens server-push connections.
pub trait Transport: Send + Sync {
    /// Start connecting. Must not block; progress is reported through `sink`.
    fn connect(&self, request: ConnectRequest, sink: SignalSink) -> TransportHandle;
}

/// Owns one live connection. Closing or dropping it stops the connection.
#[derive(Default)]
pub struct TransportHandle {
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl TransportHandle {
    /// Handle that aborts a spawned task.
    pub fn new(abort: AbortHandle) -> Self {
        Self::on_close(move || abort.abort())
    }

    /// Handle that runs `closer` once when closed.
    pub fn on_close(closer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            closer: Some(Box::new(closer)),
        }
    }

    /// A handle with nothing behind it.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Stop the connection. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("open", &self.closer.is_some())
            .finish()
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.close();
    }
}
