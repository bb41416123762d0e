//! Server-push channels.
//!
//! - `channel`: the generic reconnecting [`PushChannel`]
//! - `transport`: the seam to the network and the signal bus
//! - `sse`: the server-sent events transport
//! - `backoff`: reconnect scheduling

pub mod backoff;
pub mod channel;
pub mod sse;
pub mod state;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use channel::{Dispatch, Frame, FrameHandler, KindFilter, PushChannel, Subscription};
pub use sse::SseTransport;
pub use state::{ChannelKey, ChannelKind, ConnectionState};
pub use transport::{
    ChannelSignal, ConnectRequest, SignalReceiver, SignalSender, SignalSink, StreamEndpoint,
    Transport, TransportEvent, TransportHandle, signal_bus,
};
