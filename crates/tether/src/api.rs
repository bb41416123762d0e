//! REST client for the chat server.

use async_trait::async_trait;
use log::debug;
use reqwest::header::AUTHORIZATION;
use tether_protocol::{ChatAck, ChatRequest, InitSessionRequest, InitSessionResponse};

use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::error::ApiError;

/// Request/response half of the chat protocol.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `POST /chat/init`.
    async fn init_session(
        &self,
        credential: &Credential,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse, ApiError>;

    /// `POST /chat/message`. Only acknowledges; the reply arrives on the chat stream.
    async fn post_message(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatAck, ApiError>;
}

/// [`ChatApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    init_url: String,
    message_url: String,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            client,
            init_url: config.url(&config.endpoints.init),
            message_url: config.url(&config.endpoints.message),
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        credential: &Credential,
        body: &T,
    ) -> Result<String, ApiError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, credential.header_value())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn init_session(
        &self,
        credential: &Credential,
        request: &InitSessionRequest,
    ) -> Result<InitSessionResponse, ApiError> {
        let text = self.post(&self.init_url, credential, request).await?;
        let response: InitSessionResponse =
            serde_json::from_str(&text).map_err(|_| ApiError::MissingConversationId)?;
        if response.conversation_id.trim().is_empty() {
            return Err(ApiError::MissingConversationId);
        }
        Ok(response)
    }

    async fn post_message(
        &self,
        credential: &Credential,
        request: &ChatRequest,
    ) -> Result<ChatAck, ApiError> {
        let text = self.post(&self.message_url, credential, request).await?;
        // Some servers acknowledge with plain text.
        Ok(serde_json::from_str(&text).unwrap_or(ChatAck {
            message: text,
            process_id: None,
        }))
    }
}
