//! In-crate fakes for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tether_protocol::{ChatAck, ChatRequest, InitSessionRequest, InitSessionResponse};
use tokio::sync::Notify;

use crate::api::ChatApi;
use crate::credential::Credential;
use crate::error::ApiError;
use crate::push::{ConnectRequest, SignalSink, Transport, TransportHandle};

struct Connection {
    request: ConnectRequest,
    sink: SignalSink,
    closed: Arc<AtomicBool>,
}

/// Records every connect and lets the test drive the returned sinks.
#[derive(Default)]
pub struct FakeTransport {
    connections: Mutex<Vec<Connection>>,
}

impl FakeTransport {
    pub fn connect_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn sink(&self, index: usize) -> SignalSink {
        self.connections.lock().unwrap()[index].sink.clone()
    }

    /// Sink of the most recent connection whose URL contains `needle`.
    pub fn sink_for(&self, needle: &str) -> SignalSink {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.request.url.contains(needle))
            .map(|c| c.sink.clone())
            .unwrap_or_else(|| panic!("no connection to a URL containing {needle}"))
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.connections
            .lock()
            .unwrap()
            .last()
            .map(|c| c.request.clone())
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.request.clone())
            .collect()
    }

    pub fn was_closed(&self, index: usize) -> bool {
        self.connections.lock().unwrap()[index]
            .closed
            .load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn connect(&self, request: ConnectRequest, sink: SignalSink) -> TransportHandle {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        self.connections.lock().unwrap().push(Connection {
            request,
            sink,
            closed,
        });
        TransportHandle::on_close(move || flag.store(true, Ordering::SeqCst))
    }
}

/// Scripted [`ChatApi`].
#[derive(Default)]
pub struct FakeApi {
    init_results: Mutex<VecDeque<Result<InitSessionResponse, ApiError>>>,
    post_failures: Mutex<VecDeque<ApiError>>,
    pub init_calls: Mutex<Vec<(Credential, InitSessionRequest)>>,
    pub posts: Mutex<Vec<(Credential, ChatRequest)>>,
    post_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    /// Api whose next init returns `conversation_id` with `process_id`.
    pub fn with_session(conversation_id: &str, process_id: Option<&str>) -> Self {
        let api = Self::default();
        api.push_init(Ok(InitSessionResponse {
            conversation_id: conversation_id.to_string(),
            process_id: process_id.map(str::to_string),
        }));
        api
    }

    pub fn push_init(&self, result: Result<InitSessionResponse, ApiError>) {
        self.init_results.lock().unwrap().push_back(result);
    }

    /// Hold every post until the returned gate is notified, once per post.
    pub fn hold_posts(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.post_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make the next post fail with `error`.
    pub fn fail_next_post(&self, error: ApiError) {
        self.post_failures.lock().unwrap().push_back(error);
    }

    pub fn posted_messages(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.message.clone())
            .collect()
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn init_session(
        &self,
        credential: &Credential,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse, ApiError> {
        self.init_calls
            .lock()
            .unwrap()
            .push((credential.clone(), request.clone()));
        self.init_results.lock().unwrap().pop_front().unwrap_or(Err(
            ApiError::Status {
                status: 503,
                body: "no scripted init".to_string(),
            },
        ))
    }

    async fn post_message(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatAck, ApiError> {
        self.posts
            .lock()
            .unwrap()
            .push((credential.clone(), request.clone()));
        let gate = self.post_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.post_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(ChatAck {
            message: "You should receive a response soon".to_string(),
            process_id: None,
        })
    }
}
