//! Delayed replies posted to an interaction's `response_url`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    InChannel,
    Ephemeral,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseUrlReply {
    pub response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub delete_original: bool,
}

impl ResponseUrlReply {
    /// Removes the message that carried the clicked button.
    pub fn delete_original() -> Self {
        Self { response_type: ResponseType::InChannel, text: None, delete_original: true }
    }

    /// Replaces the clicked message with a public post.
    pub fn in_channel_post(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: Some(text.into()),
            delete_original: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("callback endpoint answered with status {0}")]
    Status(u16),
    #[error("callback body could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait CallbackResponder: Send + Sync {
    async fn respond(
        &self,
        response_url: &str,
        reply: &ResponseUrlReply,
    ) -> Result<(), CallbackError>;
}

#[derive(Clone)]
pub struct HttpCallbackResponder {
    client: Client,
}

impl HttpCallbackResponder {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackResponder for HttpCallbackResponder {
    async fn respond(
        &self,
        response_url: &str,
        reply: &ResponseUrlReply,
    ) -> Result<(), CallbackError> {
        let body = serde_json::to_vec(reply)?;
        let response = self
            .client
            .post(response_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(CallbackError::Status(other.as_u16())),
        }
    }
}
