use std::sync::Arc;

use log::{debug, error, info, warn};
use tether_protocol::{
    ChatAck, ChatRequest, InitSessionRequest, InitSessionResponse, Role, TelemetryFrame,
};
use tokio::sync::mpsc;

use super::message::{DeliveryState, History, Message, MessageId};
use super::{LifecycleState, Session};
use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::conversation::{ConversationChannel, Reply, ReplySubscription};
use crate::credential::{Credential, Identity};
use crate::error::{ApiError, SessionError};
use crate::push::{
    ChannelKind, ChannelSignal, ConnectionState, Frame, SignalReceiver, SignalSender, Transport,
    signal_bus,
};
use crate::telemetry::{TelemetryLog, TelemetryUpdate};

/// Something the UI may want to redraw for.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session started by [`start_initialize`](SessionManager::start_initialize)
    /// is active.
    Initialized { conversation_id: String },
    /// A session started by [`start_initialize`](SessionManager::start_initialize)
    /// could not be created. The lifecycle is `Failed`.
    InitializationFailed { reason: String },
    /// A posted user turn was acknowledged or rejected.
    Delivery {
        message_id: MessageId,
        state: DeliveryState,
    },
    /// An assistant reply was appended to the history.
    Reply {
        message_id: MessageId,
        content: String,
    },
    /// A telemetry frame was appended to the log.
    Telemetry { arrival_index: u64 },
    ConnectionChanged {
        kind: ChannelKind,
        state: ConnectionState,
    },
}

/// Owned view of the session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub lifecycle: LifecycleState,
    pub conversation_id: Option<String>,
    pub process_id: Option<String>,
    pub username: Option<String>,
    pub messages: Vec<Message>,
    /// True while at least one sent turn has no reply yet.
    pub awaiting_reply: bool,
    pub conversation_state: ConnectionState,
    pub telemetry_state: ConnectionState,
    pub telemetry_len: usize,
}

/// Channels bound to one session id.
struct Channels {
    conversation: ConversationChannel,
    reply: ReplySubscription,
    telemetry: TelemetryLog,
}

/// A reply as seen by the handler bound at initialize, stamped with the
/// session it was bound to.
struct BoundReply {
    epoch: u64,
    conversation_id: String,
    reply: Reply,
}

/// Result of a request running off the event loop.
enum Completion {
    Init {
        epoch: u64,
        result: Result<InitSessionResponse, ApiError>,
    },
    Post {
        epoch: u64,
        id: MessageId,
        result: Result<ChatAck, ApiError>,
    },
}

enum Next {
    Signal(ChannelSignal),
    Completion(Completion),
}

/// Owns the conversation lifecycle.
///
/// All state lives here and is mutated only through `&mut self`: commands
/// (`initialize`, `send`, `teardown`) and signals pulled off the bus by
/// [`next_event`](Self::next_event) or [`drain`](Self::drain). Each initialize
/// starts a new epoch; signals stamped with any other epoch, or arriving while
/// no session is live, are discarded.
///
/// `send`, `retry` and `start_initialize` return as soon as the request is
/// spawned. Their outcome comes back through `next_event` like any other
/// signal, so a caller driving `next_event` keeps rendering frames while a
/// request is outstanding. They must be called from within a Tokio runtime.
///
/// Replies are not correlated with the turn that caused them. Every reply
/// frame is appended in arrival order, so two replies to one send both show
/// up.
pub struct SessionManager {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    signals_tx: SignalSender,
    signals_rx: SignalReceiver,
    replies_tx: mpsc::UnboundedSender<BoundReply>,
    replies_rx: mpsc::UnboundedReceiver<BoundReply>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    session: Session,
    epoch: u64,
    channels: Option<Channels>,
    history: History,
    pending_replies: usize,
}

impl SessionManager {
    pub fn new(api: Arc<dyn ChatApi>, transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let (signals_tx, signals_rx) = signal_bus();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            api,
            transport,
            config,
            signals_tx,
            signals_rx,
            replies_tx,
            replies_rx,
            completions_tx,
            completions_rx,
            session: Session::default(),
            epoch: 0,
            channels: None,
            history: History::default(),
            pending_replies: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn lifecycle(&self) -> &LifecycleState {
        &self.session.lifecycle
    }

    pub fn messages(&self) -> &[Message] {
        self.history.messages()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// The telemetry log of the live session, empty when there is none.
    pub fn telemetry_log(&self) -> &[Frame<TelemetryFrame>] {
        match &self.channels {
            Some(channels) => channels.telemetry.log(),
            None => &[],
        }
    }

    pub fn awaiting_reply(&self) -> bool {
        self.pending_replies > 0
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a new server conversation for `identity` and bind both channels
    /// to it. A live session is torn down first.
    ///
    /// Holds the manager until the init call returns. An interactive caller
    /// that keeps pumping [`next_event`](Self::next_event) should use
    /// [`start_initialize`](Self::start_initialize) instead.
    pub async fn initialize(&mut self, identity: Identity) -> Result<(), SessionError> {
        let (credential, request) = self.begin(identity, None);
        let api = self.api.clone();
        let result = api.init_session(&credential, &request).await;
        self.finish_start(result)
    }

    /// Like [`initialize`](Self::initialize), but continues an existing
    /// server conversation.
    pub async fn resume(
        &mut self,
        identity: Identity,
        conversation_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (credential, request) = self.begin(identity, Some(conversation_id.into()));
        let api = self.api.clone();
        let result = api.init_session(&credential, &request).await;
        self.finish_start(result)
    }

    /// Start initializing in the background. The lifecycle is `Initializing`
    /// on return; the outcome arrives as [`SessionEvent::Initialized`] or
    /// [`SessionEvent::InitializationFailed`].
    pub fn start_initialize(&mut self, identity: Identity) {
        let (credential, request) = self.begin(identity, None);
        let api = self.api.clone();
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = api.init_session(&credential, &request).await;
            let _ = completions.send(Completion::Init { epoch, result });
        });
    }

    fn begin(
        &mut self,
        identity: Identity,
        conversation_id: Option<String>,
    ) -> (Credential, InitSessionRequest) {
        if self.session.lifecycle != LifecycleState::Uninitialized {
            self.teardown();
        }

        self.epoch += 1;
        self.session.lifecycle = LifecycleState::Initializing;
        info!(
            "Initializing session for {} (epoch {})",
            identity.username, self.epoch
        );
        let credential = identity.credential.clone();
        self.session.identity = Some(identity);
        (credential, InitSessionRequest { conversation_id })
    }

    fn finish_start(
        &mut self,
        result: Result<InitSessionResponse, ApiError>,
    ) -> Result<(), SessionError> {
        let response = match result {
            Ok(response) if !response.conversation_id.trim().is_empty() => response,
            Ok(_) => return Err(self.fail_init(ApiError::MissingConversationId)),
            Err(e) => return Err(self.fail_init(e)),
        };
        let Some(credential) = self.session.identity.as_ref().map(|i| i.credential.clone())
        else {
            return Err(SessionError::NotReady(self.session.lifecycle.clone()));
        };

        let conversation_id = response.conversation_id.clone();
        let telemetry_id = response.telemetry_id().to_string();
        self.history.clear();
        self.pending_replies = 0;
        self.session.id = Some(conversation_id.clone());
        self.session.process_id = response.process_id.clone();

        let channels = self.bind_channels(&conversation_id, &telemetry_id, &credential);
        self.channels = Some(channels);
        self.session.lifecycle = LifecycleState::Active;

        info!(
            "Session active: conversation {}, telemetry {}",
            conversation_id, telemetry_id
        );
        Ok(())
    }

    fn fail_init(&mut self, e: ApiError) -> SessionError {
        error!("Session initialization failed: {}", e);
        self.session.lifecycle = LifecycleState::Failed(e.to_string());
        SessionError::Initialization(e)
    }

    fn bind_channels(
        &self,
        conversation_id: &str,
        telemetry_id: &str,
        credential: &Credential,
    ) -> Channels {
        let policy = self.config.reconnect.policy();
        let mut conversation = ConversationChannel::new(
            self.epoch,
            self.transport.clone(),
            policy.clone(),
            self.signals_tx.clone(),
            self.config.chat_endpoint(),
        );
        let mut telemetry = TelemetryLog::new(
            self.epoch,
            self.transport.clone(),
            policy,
            self.signals_tx.clone(),
            self.config.telemetry_endpoint(),
        );

        let replies = self.replies_tx.clone();
        let epoch = self.epoch;
        let bound_to = conversation_id.to_string();
        let reply = conversation.on_reply(move |reply| {
            let _ = replies.send(BoundReply {
                epoch,
                conversation_id: bound_to.clone(),
                reply: reply.clone(),
            });
        });
        conversation.attach(conversation_id, credential);
        telemetry.attach(telemetry_id, credential);

        Channels {
            conversation,
            reply,
            telemetry,
        }
    }

    /// Close both channels and forget the session. Idempotent. Makes no
    /// network call.
    pub fn teardown(&mut self) {
        if let Some(mut channels) = self.channels.take() {
            channels.conversation.clear_reply(channels.reply);
            channels.conversation.detach();
            channels.telemetry.detach();
        }
        while self.replies_rx.try_recv().is_ok() {}
        if self.session.lifecycle != LifecycleState::Uninitialized {
            info!(
                "Tearing down session {}",
                self.session.id.as_deref().unwrap_or("-")
            );
        }
        self.session = Session::default();
        self.history.clear();
        self.pending_replies = 0;
    }

    /// Leave `Errored` on whichever channels are in it.
    pub fn reconnect(&mut self) -> bool {
        let Some(channels) = self.channels.as_mut() else {
            return false;
        };
        let conversation = channels.conversation.reconnect();
        let telemetry = channels.telemetry.reconnect();
        conversation || telemetry
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Append `content` as a user turn and post it in the background. The
    /// acknowledgement arrives as a [`SessionEvent::Delivery`] and the answer
    /// as a [`SessionEvent::Reply`].
    pub fn send(&mut self, content: impl Into<String>) -> Result<MessageId, SessionError> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let (conversation_id, credential) = self.ready()?;
        let id = self.history.push_user(content.clone());
        self.post(id, conversation_id, credential, content);
        Ok(id)
    }

    /// Re-post a failed user turn in place.
    pub fn retry(&mut self, id: MessageId) -> Result<MessageId, SessionError> {
        let (conversation_id, credential) = self.ready()?;
        let content = match self.history.get(id) {
            Some(message)
                if message.role == Role::User
                    && matches!(message.delivery, DeliveryState::Failed(_)) =>
            {
                message.content.clone()
            }
            _ => return Err(SessionError::UnknownMessage(id)),
        };
        self.history.set_delivery(id, DeliveryState::Pending);
        debug!("Retrying message {}", id);
        self.post(id, conversation_id, credential, content);
        Ok(id)
    }

    fn ready(&self) -> Result<(String, Credential), SessionError> {
        match (&self.session.lifecycle, &self.session.id, &self.session.identity) {
            (LifecycleState::Active, Some(id), Some(identity)) => {
                Ok((id.clone(), identity.credential.clone()))
            }
            (state, _, _) => Err(SessionError::NotReady(state.clone())),
        }
    }

    fn post(
        &mut self,
        id: MessageId,
        conversation_id: String,
        credential: Credential,
        content: String,
    ) {
        self.pending_replies += 1;
        let api = self.api.clone();
        let completions = self.completions_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let request = ChatRequest {
                message: content,
                conversation_id,
            };
            let result = api.post_message(&credential, &request).await;
            let _ = completions.send(Completion::Post { epoch, id, result });
        });
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Wait for the next signal or request outcome that changes something and
    /// apply it. Cancel-safe. Returns `None` only if the bus is closed.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let next = tokio::select! {
                Some(completion) = self.completions_rx.recv() => Next::Completion(completion),
                signal = self.signals_rx.recv() => Next::Signal(signal?),
            };
            let event = match next {
                Next::Signal(signal) => self.apply(signal),
                Next::Completion(completion) => self.complete(completion),
            };
            if let Some(event) = event {
                return Some(event);
            }
        }
    }

    /// Apply everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            if let Ok(signal) = self.signals_rx.try_recv() {
                events.extend(self.apply(signal));
            } else if let Ok(completion) = self.completions_rx.try_recv() {
                events.extend(self.complete(completion));
            } else {
                return events;
            }
        }
    }

    /// Apply one signal. Signals from a torn-down or replaced session are
    /// discarded here, before any channel sees them.
    pub fn apply(&mut self, signal: ChannelSignal) -> Option<SessionEvent> {
        if signal.key.epoch != self.epoch || self.session.id.is_none() {
            debug!(
                "Discarding {} signal from epoch {} (current {})",
                signal.key.kind, signal.key.epoch, self.epoch
            );
            return None;
        }

        let kind = signal.key.kind;
        let channels = self.channels.as_mut()?;
        match kind {
            ChannelKind::Conversation => {
                let state = channels.conversation.handle_signal(signal);
                if let Some(event) = self.take_reply() {
                    return Some(event);
                }
                state.map(|state| SessionEvent::ConnectionChanged { kind, state })
            }
            ChannelKind::Telemetry => match channels.telemetry.handle_signal(signal)? {
                TelemetryUpdate::Appended(arrival_index) => {
                    Some(SessionEvent::Telemetry { arrival_index })
                }
                TelemetryUpdate::StateChanged(state) => {
                    Some(SessionEvent::ConnectionChanged { kind, state })
                }
            },
        }
    }

    /// Append the next reply the handler queued for the live session.
    fn take_reply(&mut self) -> Option<SessionEvent> {
        while let Ok(bound) = self.replies_rx.try_recv() {
            if bound.epoch != self.epoch
                || self.session.id.as_deref() != Some(bound.conversation_id.as_str())
            {
                debug!(
                    "Discarding reply for {} from epoch {}",
                    bound.conversation_id, bound.epoch
                );
                continue;
            }
            let reply = bound.reply;
            let message_id = self
                .history
                .push_assistant(reply.content.clone(), reply.received_at);
            self.pending_replies = self.pending_replies.saturating_sub(1);
            return Some(SessionEvent::Reply {
                message_id,
                content: reply.content,
            });
        }
        None
    }

    fn complete(&mut self, completion: Completion) -> Option<SessionEvent> {
        match completion {
            Completion::Init { epoch, result } => {
                if epoch != self.epoch || self.session.lifecycle != LifecycleState::Initializing {
                    debug!("Discarding init result from epoch {}", epoch);
                    return None;
                }
                Some(match self.finish_start(result) {
                    Ok(()) => SessionEvent::Initialized {
                        conversation_id: self.session.id.clone().unwrap_or_default(),
                    },
                    Err(e) => SessionEvent::InitializationFailed {
                        reason: e.to_string(),
                    },
                })
            }
            Completion::Post { epoch, id, result } => {
                if epoch != self.epoch || self.session.id.is_none() {
                    debug!("Discarding delivery of {} from epoch {}", id, epoch);
                    return None;
                }
                let state = match result {
                    Ok(ack) => {
                        debug!("Message {} acknowledged: {}", id, ack.message);
                        DeliveryState::Sent
                    }
                    Err(e) => {
                        warn!("Failed to send message {}: {}", id, e);
                        self.pending_replies = self.pending_replies.saturating_sub(1);
                        DeliveryState::Failed(e.to_string())
                    }
                };
                self.history.set_delivery(id, state.clone());
                Some(SessionEvent::Delivery {
                    message_id: id,
                    state,
                })
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (conversation_state, telemetry_state, telemetry_len) = match &self.channels {
            Some(channels) => (
                channels.conversation.connection_state().clone(),
                channels.telemetry.connection_state().clone(),
                channels.telemetry.len(),
            ),
            None => (
                ConnectionState::Disconnected,
                ConnectionState::Disconnected,
                0,
            ),
        };

        SessionSnapshot {
            lifecycle: self.session.lifecycle.clone(),
            conversation_id: self.session.id.clone(),
            process_id: self.session.process_id.clone(),
            username: self.session.identity.as_ref().map(|i| i.username.clone()),
            messages: self.history.messages().to_vec(),
            awaiting_reply: self.awaiting_reply(),
            conversation_state,
            telemetry_state,
            telemetry_len,
        }
    }
}
