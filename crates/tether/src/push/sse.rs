//! Server-sent events transport.
//!
//! Each connection runs on its own tokio task and reports into the signal
//! bus. `reqwest-eventsource`'s built-in retry is disabled: a failure ends
//! the task, and the owning channel decides whether and when to reconnect.

use std::time::Duration;

use futures::StreamExt;
use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest_eventsource::{Error as SseError, Event, EventSource, RequestBuilderExt, retry};

use super::transport::{ConnectRequest, SignalSink, Transport, TransportHandle};
use crate::config::ClientConfig;

/// SSE transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    credential_query_param: Option<String>,
}

impl SseTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, reqwest::Error> {
        // No overall timeout: streams are long-lived.
        let client = reqwest::Client::builder()
            .connect_timeout(config.request_timeout())
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self::with_client(
            client,
            config.endpoints.credential_query_param.clone(),
        ))
    }

    pub fn with_client(client: reqwest::Client, credential_query_param: Option<String>) -> Self {
        Self {
            client,
            credential_query_param,
        }
    }
}

impl Transport for SseTransport {
    fn connect(&self, request: ConnectRequest, sink: SignalSink) -> TransportHandle {
        let mut builder = self
            .client
            .get(&request.url)
            .header(ACCEPT, "text/event-stream")
            .header(AUTHORIZATION, request.credential.header_value());
        if let Some(param) = self.credential_query_param.as_deref() {
            builder = builder.query(&[(param, request.credential.value())]);
        }

        let source = match builder.eventsource() {
            Ok(source) => source,
            Err(e) => {
                sink.failed(format!("cannot build event source: {e:?}"));
                return TransportHandle::detached();
            }
        };

        let task = tokio::spawn(stream_events(source, sink));
        TransportHandle::new(task.abort_handle())
    }
}

async fn stream_events(mut source: EventSource, sink: SignalSink) {
    source.set_retry_policy(Box::new(retry::Never));
    let key = sink.key().clone();

    let reason = loop {
        match source.next().await {
            Some(Ok(Event::Open)) => {
                debug!("{} stream opened for {}", key.kind, key.session_id);
                if !sink.opened() {
                    source.close();
                    return;
                }
            }
            Some(Ok(Event::Message(message))) => {
                if !sink.frame(message.event, message.data) {
                    source.close();
                    return;
                }
            }
            Some(Err(SseError::StreamEnded)) | None => break "stream ended".to_string(),
            Some(Err(e)) => break describe_error(&e),
        }
    };

    source.close();
    warn!(
        "{} stream for {} failed: {}",
        key.kind, key.session_id, reason
    );
    sink.failed(reason);
}

fn describe_error(error: &SseError) -> String {
    match error {
        SseError::InvalidStatusCode(status, _) => format!("unexpected status {status}"),
        SseError::InvalidContentType(content_type, _) => {
            format!("unexpected content type {content_type:?}")
        }
        SseError::Transport(e) => format!("transport error: {e}"),
        other => other.to_string(),
    }
}
