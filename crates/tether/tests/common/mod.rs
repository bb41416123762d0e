//! In-process chat server for integration tests.
#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, KeepAliveStream, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use tether::config::ClientConfig;
use tether::{Credential, HttpChatApi, Identity, SessionManager, SseTransport};
use tether_protocol::{ChatRequest, InitSessionRequest};

pub const TOKEN: &str = "test-token";
pub const PROCESS_ID: &str = "proc-1";

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Shared state of the fake server. Tests use it to script and inspect.
#[derive(Clone)]
pub struct ServerState {
    replies: broadcast::Sender<(String, String)>,
    telemetry: broadcast::Sender<(String, String)>,
    /// Authorization headers seen, in request order.
    pub auth_headers: Arc<Mutex<Vec<String>>>,
    /// Ids telemetry streams were opened for.
    pub telemetry_opens: Arc<Mutex<Vec<String>>>,
    /// Telemetry streams to end right after their `connected` frame.
    drop_telemetry: Arc<Mutex<usize>>,
}

impl ServerState {
    fn new() -> Self {
        let (replies, _) = broadcast::channel(64);
        let (telemetry, _) = broadcast::channel(64);
        Self {
            replies,
            telemetry,
            auth_headers: Arc::new(Mutex::new(Vec::new())),
            telemetry_opens: Arc::new(Mutex::new(Vec::new())),
            drop_telemetry: Arc::new(Mutex::new(0)),
        }
    }

    /// Push a reply onto the chat stream of `conversation_id`.
    pub fn push_reply(&self, conversation_id: &str, content: &str) {
        let data = json!({ "processId": PROCESS_ID, "message": { "content": content } });
        self.replies
            .send((conversation_id.to_string(), data.to_string()))
            .ok();
    }

    pub fn push_telemetry(&self, process_id: &str, event_type: &str) {
        let data = json!({
            "processId": process_id,
            "timestamp": "2024-05-01T10:00:00Z",
            "eventType": event_type,
        });
        self.telemetry
            .send((process_id.to_string(), data.to_string()))
            .ok();
    }

    pub fn drop_next_telemetry_streams(&self, count: usize) {
        *self.drop_telemetry.lock().unwrap() = count;
    }

    fn record_auth(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(value) = &value {
            self.auth_headers.lock().unwrap().push(value.clone());
        }
        value
    }
}

pub struct TestServer {
    pub base_url: String,
    pub state: ServerState,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let state = ServerState::new();
        let app = Router::new()
            .route("/chat/init", post(init))
            .route("/chat/message", post(message))
            .route("/chat/stream/{id}", get(chat_stream))
            .route("/events/process/{id}", get(telemetry_stream))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.server.base_url = self.base_url.clone();
        config.server.request_timeout_secs = 5;
        config.reconnect.base_delay_ms = 50;
        config.reconnect.max_delay_ms = 200;
        config.reconnect.max_attempts = 3;
        config.reconnect.jitter = 0.0;
        config
    }

    pub fn manager(&self) -> SessionManager {
        let config = self.config();
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let api = HttpChatApi::with_client(client.clone(), &config);
        let transport = SseTransport::with_client(client, None);
        SessionManager::new(Arc::new(api), Arc::new(transport), config)
    }
}

pub fn identity() -> Identity {
    Identity::new("alice", Credential::bearer(TOKEN))
}

/// Pump events until `done` holds, failing after five seconds.
pub async fn wait_until(manager: &mut SessionManager, mut done: impl FnMut(&SessionManager) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async move {
        while !done(manager) {
            manager.next_event().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for session condition");
}

async fn init(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<InitSessionRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if state.record_auth(&headers) != Some(format!("Bearer {TOKEN}")) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let conversation_id = request
        .conversation_id
        .unwrap_or_else(|| "conv-1".to_string());
    Ok(Json(json!({
        "conversationId": conversation_id,
        "processId": PROCESS_ID,
    })))
}

async fn message(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Json<serde_json::Value> {
    state.record_auth(&headers);

    // Answer asynchronously, like the real agent.
    let replying = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        replying.push_telemetry(PROCESS_ID, "agent.llm.request");
        replying.push_reply(&request.conversation_id, &format!("echo: {}", request.message));
    });

    Json(json!({
        "message": "You should receive a response soon",
        "processId": PROCESS_ID,
    }))
}

async fn chat_stream(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Sse<KeepAliveStream<EventStream>> {
    state.record_auth(&headers);
    let updates = BroadcastStream::new(state.replies.subscribe()).filter_map(move |item| {
        let event: Option<Result<Event, Infallible>> = match item {
            Ok((target, data)) if target == id => Some(Ok(Event::default()
                .event("MessageOutputChannelEvent")
                .data(data))),
            _ => None,
        };
        async move { event }
    });

    let connected = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("Connected").data("Connected"))
    });
    Sse::new(connected.chain(updates).boxed()).keep_alive(KeepAlive::default())
}

async fn telemetry_stream(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    state.record_auth(&headers);
    state.telemetry_opens.lock().unwrap().push(id.clone());

    let connected = stream::once(async {
        Ok::<_, Infallible>(Event::default().event("connected").data("Connected"))
    });

    let drop_stream = {
        let mut remaining = state.drop_telemetry.lock().unwrap();
        let drop_stream = *remaining > 0;
        *remaining = remaining.saturating_sub(1);
        drop_stream
    };
    if drop_stream {
        return Sse::new(connected.boxed()).into_response();
    }

    let updates = BroadcastStream::new(state.telemetry.subscribe()).filter_map(move |item| {
        let event: Option<Result<Event, Infallible>> = match item {
            Ok((target, data)) if target == id => Some(Ok(Event::default()
                .event("agent-process-event")
                .data(data))),
            _ => None,
        };
        async move { event }
    });
    Sse::new(connected.chain(updates).boxed())
        .keep_alive(KeepAlive::default())
        .into_response()
}
