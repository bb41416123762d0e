//! Live agent telemetry feed.
//!
//! A [`TelemetryLog`] owns one [`PushChannel`] bound to a process (or
//! conversation) id and appends every accepted frame, whatever its kind, to an
//! append-only log ordered by arrival. Nothing is ever removed or reordered;
//! detaching stops growth but keeps what was received. The log is discarded
//! only together with the `TelemetryLog` itself.

use std::sync::Arc;

use log::debug;
use tether_protocol::TelemetryFrame;

use crate::credential::Credential;
use crate::push::{
    ChannelKey, ChannelKind, ChannelSignal, ConnectionState, Dispatch, Frame, KindFilter,
    PushChannel, ReconnectPolicy, SignalSender, StreamEndpoint, Subscription, Transport,
};

/// What a signal did to the log.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryUpdate {
    /// A frame was appended at this arrival index.
    Appended(u64),
    StateChanged(ConnectionState),
}

pub struct TelemetryLog {
    channel: PushChannel<TelemetryFrame>,
    endpoint: StreamEndpoint,
    entries: Vec<Frame<TelemetryFrame>>,
}

impl TelemetryLog {
    pub fn new(
        epoch: u64,
        transport: Arc<dyn Transport>,
        policy: ReconnectPolicy,
        signals: SignalSender,
        endpoint: StreamEndpoint,
    ) -> Self {
        Self {
            channel: PushChannel::new(ChannelKind::Telemetry, epoch, transport, policy, signals),
            endpoint,
            entries: Vec::new(),
        }
    }

    /// Start receiving telemetry for `id`.
    pub fn attach(&mut self, id: &str, credential: &Credential) -> ChannelKey {
        let request = self.endpoint.request(id, credential);
        self.channel.open(id, request)
    }

    /// Stop receiving. Entries already appended are kept.
    pub fn detach(&mut self) {
        self.channel.close();
    }

    pub fn reconnect(&mut self) -> bool {
        self.channel.reconnect()
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal) -> Option<TelemetryUpdate> {
        match self.channel.handle_signal(signal) {
            Dispatch::Frame(frame) => {
                let index = frame.arrival_index;
                debug!("telemetry #{} {}", index, frame.payload.label());
                self.entries.push(frame);
                Some(TelemetryUpdate::Appended(index))
            }
            Dispatch::StateChanged(state) => Some(TelemetryUpdate::StateChanged(state)),
            Dispatch::Stale | Dispatch::Dropped => None,
        }
    }

    /// The log in arrival order.
    pub fn log(&self) -> &[Frame<TelemetryFrame>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn connection_state(&self) -> &ConnectionState {
        self.channel.state()
    }

    /// Id the log is attached to, if any.
    pub fn attached_to(&self) -> Option<&str> {
        self.channel.session_id()
    }

    /// Observe frames as they are appended. Dropped on detach.
    pub fn subscribe(
        &mut self,
        filter: KindFilter,
        handler: impl FnMut(&Frame<TelemetryFrame>) + Send + 'static,
    ) -> Subscription {
        self.channel.subscribe(filter, handler)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.channel.unsubscribe(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{SignalReceiver, signal_bus};
    use crate::testing::FakeTransport;
    use std::sync::Mutex;

    struct Harness {
        transport: Arc<FakeTransport>,
        log: TelemetryLog,
        rx: SignalReceiver,
    }

    impl Harness {
        fn pump(&mut self) -> Vec<TelemetryUpdate> {
            let mut out = Vec::new();
            while let Ok(signal) = self.rx.try_recv() {
                out.extend(self.log.handle_signal(signal));
            }
            out
        }
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let (tx, rx) = signal_bus();
        let policy = ReconnectPolicy {
            jitter: 0.0,
            ..ReconnectPolicy::default()
        };
        let log = TelemetryLog::new(
            1,
            transport.clone(),
            policy,
            tx,
            StreamEndpoint::new("http://host/events/process/{id}"),
        );
        Harness { transport, log, rx }
    }

    fn event(event_type: &str) -> String {
        serde_json::json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "eventType": event_type,
            "detail": { "step": 1 }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_attach_connects_with_credential() {
        let mut h = harness();
        h.log.attach("p-7", &Credential::bearer("tok"));

        let request = h.transport.last_request().unwrap();
        assert_eq!(request.url, "http://host/events/process/p-7");
        assert_eq!(request.credential, Credential::bearer("tok"));
        assert_eq!(h.log.attached_to(), Some("p-7"));
        assert_eq!(h.log.connection_state(), &ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_every_frame_is_appended_in_arrival_order() {
        let mut h = harness();
        h.log.attach("p-7", &Credential::bearer("tok"));
        let sink = h.transport.sink(0);
        sink.opened();
        sink.frame("connected", "Connected");
        for i in 0..4 {
            sink.frame("agent-process-event", event(&format!("agent.step.{i}")));
        }
        sink.frame("heartbeat", "{}");

        let updates = h.pump();
        assert_eq!(updates[0], TelemetryUpdate::StateChanged(ConnectionState::Connected));
        assert_eq!(h.log.len(), 6);

        let indexes: Vec<u64> = h.log.log().iter().map(|f| f.arrival_index).collect();
        assert!(indexes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(h.log.log()[0].payload.label(), "connected");
        assert_eq!(h.log.log()[2].payload.label(), "1");
        match &h.log.log()[5].payload {
            TelemetryFrame::Unknown { kind, .. } => assert_eq!(kind, "heartbeat"),
            other => panic!("Expected unknown frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detach_during_connecting_keeps_log_empty() {
        let mut h = harness();
        h.log.attach("p-7", &Credential::bearer("tok"));
        let sink = h.transport.sink(0);
        h.log.detach();

        sink.opened();
        sink.frame("agent-process-event", event("late"));

        assert!(h.pump().is_empty());
        assert!(h.log.is_empty());
        assert_eq!(h.log.connection_state(), &ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_detach_preserves_entries() {
        let mut h = harness();
        h.log.attach("p-7", &Credential::bearer("tok"));
        let sink = h.transport.sink(0);
        sink.opened();
        sink.frame("agent-process-event", event("a"));
        sink.frame("agent-process-event", event("b"));
        h.pump();

        h.log.detach();
        sink.frame("agent-process-event", event("c"));
        h.pump();

        assert_eq!(h.log.len(), 2);
        assert!(h.log.attached_to().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_network_error_keeps_frames() {
        let mut h = harness();
        h.log.attach("p-7", &Credential::bearer("tok"));
        let first = h.transport.sink(0);
        first.opened();
        first.frame("agent-process-event", event("a"));
        first.frame("agent-process-event", event("b"));
        first.failed("network");

        let updates = h.pump();
        assert_eq!(
            updates.last(),
            Some(&TelemetryUpdate::StateChanged(ConnectionState::Errored {
                reason: "network".to_string(),
                terminal: false
            }))
        );
        assert_eq!(h.log.len(), 2);

        let retry = h.rx.recv().await.unwrap();
        assert_eq!(
            h.log.handle_signal(retry),
            Some(TelemetryUpdate::StateChanged(ConnectionState::Connecting))
        );

        let second = h.transport.sink(1);
        second.opened();
        second.frame("agent-process-event", event("c"));
        h.pump();

        assert!(h.log.connection_state().is_connected());
        let indexes: Vec<u64> = h.log.log().iter().map(|f| f.arrival_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(h.transport.was_closed(0));
    }

    #[tokio::test]
    async fn test_subscribers_see_appended_frames() {
        let mut h = harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler_seen = seen.clone();
        h.log.subscribe(KindFilter::kind("agent-process-event"), move |frame| {
            handler_seen.lock().unwrap().push(frame.arrival_index);
        });

        h.log.attach("p-7", &Credential::bearer("tok"));
        let sink = h.transport.sink(0);
        sink.opened();
        sink.frame("connected", "{}");
        sink.frame("agent-process-event", event("a"));
        h.pump();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }
}
