//! Authenticated HTTP client for the messaging REST API
//!
//! Wraps reqwest::Client with bearer token injection and status mapping.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::{ChatApi, OutgoingMessage};
use crate::config::Config;
use crate::error::TransportError;
use crate::models::{Conversation, ConversationId, Message, MessageId};

/// REST client for the authoritative message store.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
}

impl ChatClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, TransportError> {
        let invalid = |reason: String| TransportError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = url::Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: parsed,
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        if config.api_token.is_none() {
            tracing::warn!("No API token configured; requests will be sent unauthenticated");
        }
        Self::new(&config.api_base_url, config.api_token.clone())
    }

    /// Base URL with `segments` appended, each percent-encoded as a path segment.
    pub(super) fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        // Only fails for cannot-be-a-base URLs, rejected in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.into()
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// GET and decode a JSON body.
    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &[&str],
    ) -> Result<T, TransportError> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self.authorize(self.http.get(&url)).send().await?;
        let resp = check_response(resp, &url).await?;
        decode(resp).await
    }

    /// POST a JSON body, returning the raw response.
    pub(super) async fn post_json(
        &self,
        path: &[&str],
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TransportError> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self.authorize(self.http.post(&url)).json(body).send().await?;
        check_response(resp, &url).await
    }

    /// POST a multipart form, returning the raw response.
    pub(super) async fn post_multipart(
        &self,
        path: &[&str],
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response, TransportError> {
        let url = self.url(path);
        tracing::debug!("POST (multipart) {}", url);

        let resp = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await?;
        check_response(resp, &url).await
    }
}

pub(super) async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, TransportError> {
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(TransportError::Unauthorized {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(TransportError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            body,
        });
    }
    Ok(resp)
}

#[async_trait]
impl ChatApi for ChatClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        self.conversations().await
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, TransportError> {
        self.messages(conversation).await
    }

    async fn fetch_unread(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, TransportError> {
        self.unread_messages(conversation).await
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> Result<Message, TransportError> {
        self.post_message(conversation, message).await
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message: Option<&MessageId>,
    ) -> Result<(), TransportError> {
        self.post_mark_read(conversation, message).await
    }
}
