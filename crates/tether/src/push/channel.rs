//! Generic reconnecting push channel.
//!
//! A `PushChannel` owns one server-push connection keyed by an identifier. It
//! tracks [`ConnectionState`], decodes incoming payloads into the frame type
//! `F`, stamps each accepted frame with an arrival index, and hands it to
//! subscribers registered for its kind. It knows nothing about what frames
//! mean.
//!
//! Signals are applied through [`PushChannel::handle_signal`]. Anything
//! stamped with a key other than the current one is discarded before
//! dispatch. Unregistering handlers alone is not enough, because a transport
//! may already have queued an event when the channel is closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tether_protocol::{WireFrame, kind_name};
use tokio::task::AbortHandle;

use super::backoff::ReconnectPolicy;
use super::state::{ChannelKey, ChannelKind, ConnectionState};
use super::transport::{
    ChannelSignal, ConnectRequest, SignalSender, SignalSink, Transport, TransportEvent,
    TransportHandle,
};

/// One received frame. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<F> {
    /// Event name as sent by the server.
    pub kind: String,
    pub payload: F,
    /// Position in receipt order, starting at 0 for each channel.
    pub arrival_index: u64,
    pub received_at: DateTime<Utc>,
}

/// Which frame kinds a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    Any,
    /// Matched on the last dotted segment.
    Kind(String),
}

impl KindFilter {
    pub fn kind(name: impl Into<String>) -> Self {
        Self::Kind(name.into())
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Kind(name) => kind_name(name) == kind_name(kind),
        }
    }
}

/// Token returned by [`PushChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

pub type FrameHandler<F> = Box<dyn FnMut(&Frame<F>) + Send>;

/// Outcome of applying one signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch<F> {
    /// The signal belonged to a closed or superseded connection.
    Stale,
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// A frame was accepted and delivered to matching subscribers.
    Frame(Frame<F>),
    /// The payload could not be decoded. Logged, connection unaffected.
    Dropped,
}

struct Subscriber<F> {
    id: Subscription,
    filter: KindFilter,
    handler: FrameHandler<F>,
}

pub struct PushChannel<F: WireFrame> {
    kind: ChannelKind,
    epoch: u64,
    transport: Arc<dyn Transport>,
    policy: ReconnectPolicy,
    signals: SignalSender,
    target: Option<(String, ConnectRequest)>,
    state: ConnectionState,
    generation: u64,
    attempt: u32,
    next_index: u64,
    handle: Option<TransportHandle>,
    retry_timer: Option<AbortHandle>,
    subscribers: Vec<Subscriber<F>>,
    next_subscription: u64,
}

impl<F: WireFrame> PushChannel<F> {
    pub fn new(
        kind: ChannelKind,
        epoch: u64,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        signals: SignalSender,
    ) -> Self {
        Self {
            kind,
            epoch,
            transport,
            policy,
            signals,
            target: None,
            state: ConnectionState::Disconnected,
            generation: 0,
            attempt: 0,
            next_index: 0,
            handle: None,
            retry_timer: None,
            subscribers: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Identifier the channel is open for, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.target.as_ref().map(|(id, _)| id.as_str())
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Key of the current connection, if open.
    pub fn key(&self) -> Option<ChannelKey> {
        self.session_id().map(|id| ChannelKey {
            kind: self.kind,
            session_id: id.to_string(),
            epoch: self.epoch,
            generation: self.generation,
        })
    }

    /// Open a connection for `session_id`. Any previous connection on this
    /// channel is dropped first. Never fails: problems surface as state.
    pub fn open(&mut self, session_id: &str, request: ConnectRequest) -> ChannelKey {
        self.disconnect();
        self.target = Some((session_id.to_string(), request.clone()));
        self.attempt = 0;
        info!("Opening {} channel for {}", self.kind, session_id);
        self.connect(session_id.to_string(), request)
    }

    /// Leave `Errored` and try again, resetting the attempt counter.
    /// Returns false when there is nothing to reconnect.
    pub fn reconnect(&mut self) -> bool {
        if !matches!(self.state, ConnectionState::Errored { .. }) {
            return false;
        }
        let Some((session_id, request)) = self.target.clone() else {
            return false;
        };
        self.attempt = 0;
        self.cancel_retry();
        self.connect(session_id, request);
        true
    }

    /// Close the connection and drop all subscribers. Idempotent, and safe to
    /// call while a connection is still being established.
    pub fn close(&mut self) {
        let was_open = self.target.is_some();
        self.disconnect();
        self.target = None;
        self.subscribers.clear();
        self.state = ConnectionState::Disconnected;
        if was_open {
            info!("Closed {} channel", self.kind);
        }
    }

    pub fn subscribe(
        &mut self,
        filter: KindFilter,
        handler: impl FnMut(&Frame<F>) + Send + 'static,
    ) -> Subscription {
        let id = Subscription(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            filter,
            handler: Box::new(handler),
        });
        id
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != subscription);
        self.subscribers.len() != before
    }

    /// Apply one signal from the bus.
    pub fn handle_signal(&mut self, signal: ChannelSignal) -> Dispatch<F> {
        if self.key().as_ref() != Some(&signal.key) {
            debug!(
                "Dropping stale {} signal for {} (generation {})",
                signal.key.kind, signal.key.session_id, signal.key.generation
            );
            return Dispatch::Stale;
        }

        match signal.event {
            TransportEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    return Dispatch::Stale;
                }
                self.attempt = 0;
                info!("{} channel connected for {}", self.kind, signal.key.session_id);
                self.set_state(ConnectionState::Connected)
            }
            TransportEvent::Frame { kind, data } => {
                if !matches!(
                    self.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ) {
                    return Dispatch::Stale;
                }
                self.accept_frame(kind, &data)
            }
            TransportEvent::Failed { reason } => {
                if matches!(self.state, ConnectionState::Errored { .. }) {
                    return Dispatch::Stale;
                }
                self.on_failure(reason)
            }
            TransportEvent::RetryDue => {
                if !matches!(self.state, ConnectionState::Errored { terminal: false, .. }) {
                    return Dispatch::Stale;
                }
                let Some((session_id, request)) = self.target.clone() else {
                    return Dispatch::Stale;
                };
                self.retry_timer = None;
                info!(
                    "Reconnecting {} channel for {} (attempt {})",
                    self.kind, session_id, self.attempt
                );
                self.connect(session_id, request);
                Dispatch::StateChanged(self.state.clone())
            }
        }
    }

    fn accept_frame(&mut self, kind: String, data: &str) -> Dispatch<F> {
        let payload = match F::decode(&kind, data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping {} frame: {}", self.kind, e);
                return Dispatch::Dropped;
            }
        };

        let frame = Frame {
            kind,
            payload,
            arrival_index: self.next_index,
            received_at: Utc::now(),
        };
        self.next_index += 1;

        let mut delivered = false;
        for subscriber in self
            .subscribers
            .iter_mut()
            .filter(|s| s.filter.matches(&frame.kind))
        {
            (subscriber.handler)(&frame);
            delivered = true;
        }
        if !delivered {
            debug!("No {} subscriber for frame kind '{}'", self.kind, frame.kind);
        }

        Dispatch::Frame(frame)
    }

    fn on_failure(&mut self, reason: String) -> Dispatch<F> {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.attempt += 1;

        if self.policy.allows(self.attempt) {
            let delay = self.policy.delay_for(self.attempt);
            warn!(
                "{} channel failed ({}), retrying in {}ms (attempt {}/{})",
                self.kind,
                reason,
                delay.as_millis(),
                self.attempt,
                self.policy.max_attempts
            );
            self.schedule_retry(delay);
            self.set_state(ConnectionState::Errored {
                reason,
                terminal: false,
            })
        } else {
            error!(
                "{} channel failed ({}), giving up after {} attempts",
                self.kind, reason, self.policy.max_attempts
            );
            self.set_state(ConnectionState::Errored {
                reason,
                terminal: true,
            })
        }
    }

    fn connect(&mut self, session_id: String, request: ConnectRequest) -> ChannelKey {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;

        let key = ChannelKey {
            kind: self.kind,
            session_id,
            epoch: self.epoch,
            generation: self.generation,
        };
        let sink = SignalSink::new(key.clone(), self.signals.clone());
        self.handle = Some(self.transport.connect(request, sink));
        key
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        let Some(key) = self.key() else {
            return;
        };
        let sink = SignalSink::new(key, self.signals.clone());
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sink.retry_due();
        });
        self.retry_timer = Some(task.abort_handle());
    }

    fn cancel_retry(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
    }

    /// Stop the transport and pending retry, and invalidate queued signals.
    fn disconnect(&mut self) {
        self.cancel_retry();
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
        self.generation += 1;
    }

    fn set_state(&mut self, state: ConnectionState) -> Dispatch<F> {
        self.state = state.clone();
        Dispatch::StateChanged(state)
    }
}

impl<F: WireFrame> Drop for PushChannel<F> {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}
