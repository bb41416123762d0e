//! Assistant reply channel.
//!
//! Wraps a [`PushChannel`] bound to a conversation id. Of the frame kinds the
//! server pushes here, only `MessageOutputChannelEvent` carries a reply;
//! everything else is accepted and ignored. The channel keeps no history.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::debug;
use tether_protocol::ChatFrame;
use tether_protocol::frames::MESSAGE_KIND;

use crate::credential::Credential;
use crate::push::{
    ChannelKey, ChannelKind, ChannelSignal, ConnectionState, Dispatch, Frame, KindFilter,
    PushChannel, ReconnectPolicy, SignalSender, StreamEndpoint, Subscription, Transport,
};

/// One assistant reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    pub role: Option<String>,
    pub arrival_index: u64,
    pub received_at: DateTime<Utc>,
}

impl Reply {
    fn from_frame(frame: &Frame<ChatFrame>) -> Option<Self> {
        let ChatFrame::Message { message, .. } = &frame.payload else {
            return None;
        };
        let content = frame.payload.reply_content()?;
        Some(Self {
            content: content.to_string(),
            role: message.role.clone(),
            arrival_index: frame.arrival_index,
            received_at: frame.received_at,
        })
    }
}

/// Registration of the reply handler. Only the latest one is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplySubscription(Subscription);

pub struct ConversationChannel {
    channel: PushChannel<ChatFrame>,
    endpoint: StreamEndpoint,
    reply: Option<ReplySubscription>,
}

impl ConversationChannel {
    pub fn new(
        epoch: u64,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        signals: SignalSender,
        endpoint: StreamEndpoint,
    ) -> Self {
        Self {
            channel: PushChannel::new(ChannelKind::Conversation, epoch, transport, policy, signals),
            endpoint,
            reply: None,
        }
    }

    pub fn attach(&mut self, conversation_id: &str, credential: &Credential) -> ChannelKey {
        let request = self.endpoint.request(conversation_id, credential);
        self.channel.open(conversation_id, request)
    }

    /// Close the stream and drop the reply handler.
    pub fn detach(&mut self) {
        self.channel.close();
        self.reply = None;
    }

    pub fn reconnect(&mut self) -> bool {
        self.channel.reconnect()
    }

    /// Register the reply handler, replacing any previous one. The handler
    /// runs exactly once per reply frame.
    pub fn on_reply(&mut self, mut handler: impl FnMut(&Reply) + Send + 'static) -> ReplySubscription {
        if let Some(previous) = self.reply.take() {
            debug!("Replacing reply handler");
            self.channel.unsubscribe(previous.0);
        }
        let subscription = self
            .channel
            .subscribe(KindFilter::kind(MESSAGE_KIND), move |frame| {
                if let Some(reply) = Reply::from_frame(frame) {
                    handler(&reply);
                }
            });
        let subscription = ReplySubscription(subscription);
        self.reply = Some(subscription);
        subscription
    }

    /// Remove the handler if `subscription` is still the live one.
    pub fn clear_reply(&mut self, subscription: ReplySubscription) -> bool {
        if self.reply != Some(subscription) {
            return false;
        }
        self.reply = None;
        self.channel.unsubscribe(subscription.0)
    }

    pub fn has_reply_handler(&self) -> bool {
        self.reply.is_some()
    }

    /// Apply one signal. Replies go to the handler registered with
    /// [`on_reply`](Self::on_reply); only connection state changes are
    /// returned.
    pub fn handle_signal(&mut self, signal: ChannelSignal) -> Option<ConnectionState> {
        match self.channel.handle_signal(signal) {
            Dispatch::Frame(frame) => {
                if !matches!(frame.payload, ChatFrame::Message { .. }) {
                    debug!("Ignoring {} frame", frame.kind);
                }
                None
            }
            Dispatch::StateChanged(state) => Some(state),
            Dispatch::Stale | Dispatch::Dropped => None,
        }
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.channel.state()
    }

    pub fn attached_to(&self) -> Option<&str> {
        self.channel.session_id()
    }
}
