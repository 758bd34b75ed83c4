//! Authoritative REST source for conversation lists, transcripts and
//! participant profiles.

use std::future::Future;

use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use jobchat_types::models::{ChatMessage, ConversationSummary, Participant};

use crate::config::ClientConfig;
use crate::error::FetchError;

/// Read side of the chat backend. The session only ever needs these three
/// lookups; writes go over the real-time channel.
pub trait ChatApi: Send + Sync + 'static {
    /// One entry per counterpart, newest activity first.
    fn list_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationSummary>, FetchError>> + Send;

    /// Full history with `counterpart`, oldest first.
    fn fetch_transcript(
        &self,
        counterpart: Uuid,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, FetchError>> + Send;

    fn fetch_participant(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Participant, FetchError>> + Send;
}

#[derive(Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpChatApi {
    pub fn new(config: &ClientConfig, token: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
            token: token.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, FetchError> {
        self.get_json("/conversations").await
    }

    async fn fetch_transcript(&self, counterpart: Uuid) -> Result<Vec<ChatMessage>, FetchError> {
        self.get_json(&format!("/conversations/{counterpart}/messages"))
            .await
    }

    async fn fetch_participant(&self, id: Uuid) -> Result<Participant, FetchError> {
        self.get_json(&format!("/participants/{id}")).await
    }
}
