//! Streaming voice chat requests
//!
//! A recorded utterance is uploaded once and the reply arrives as a single
//! long-lived response body of newline-delimited JSON records.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;

use super::retry::{RetryPolicy, send_with_retry};
use crate::{Error, Result};

/// Response body as it arrives from the service
pub type ChatStream = BoxStream<'static, Result<Vec<u8>>>;

/// Per-request chat parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    /// Model the service should answer with
    pub llm_model: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            llm_model: "gpt-3.5-turbo".to_string(),
            system_prompt: None,
        }
    }
}

/// Client for the streaming voice chat endpoint
///
/// Holds the conversation's session id so consecutive utterances share
/// context on the service side.
#[derive(Debug)]
pub struct VoiceChatClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    session_id: RwLock<String>,
}

impl VoiceChatClient {
    /// Create a client for the service at `base_url` with a fresh session
    ///
    /// `connect_timeout` bounds connection setup only; the reply stream
    /// itself may run for as long as the service keeps talking.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(base_url: &str, connect_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');
        if base_url.is_empty() {
            return Err(Error::Config("voice chat base URL is empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            retry,
            session_id: RwLock::new(new_session_id()),
        })
    }

    /// Current conversation session id
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Continue an existing conversation
    pub fn set_session_id(&self, id: impl Into<String>) {
        let id = id.into();
        tracing::debug!(session_id = %id, "session id set");
        *self.session_id.write().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Start a new conversation and return its id
    pub fn reset_session(&self) -> String {
        let id = new_session_id();
        self.set_session_id(id.clone());
        id
    }

    /// Upload a recorded utterance and return the reply body as a stream
    ///
    /// # Errors
    ///
    /// Returns error if the upload is rejected or the service is unreachable
    pub async fn open_stream(&self, wav: Vec<u8>, options: &ChatOptions) -> Result<ChatStream> {
        let url = format!("{}/api/chat/voice/stream", self.base_url);
        let session_id = self.session_id();

        let mut query = vec![
            ("llm_model", options.llm_model.as_str()),
            ("session_id", session_id.as_str()),
        ];
        if let Some(prompt) = options.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            query.push(("system_prompt", prompt));
        }

        tracing::debug!(
            audio_bytes = wav.len(),
            session_id = %session_id,
            llm_model = %options.llm_model,
            "opening voice chat stream"
        );

        let response = send_with_retry(&self.retry, "voice chat", || {
            let part = reqwest::multipart::Part::bytes(wav.clone())
                .file_name("audio.wav")
                .mime_str("audio/wav")
                .unwrap_or_else(|_| reqwest::multipart::Part::bytes(wav.clone()));
            let form = reqwest::multipart::Form::new().part("audio", part);

            self.client
                .post(&url)
                .query(&query)
                .header(reqwest::header::ACCEPT, "application/json")
                .multipart(form)
        })
        .await?;

        tracing::debug!(status = %response.status(), "voice chat stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from))
            .boxed())
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> VoiceChatClient {
        VoiceChatClient::new(
            "http://127.0.0.1:8000/",
            Duration::from_secs(5),
            RetryPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn starts_with_a_session() {
        let client = client();
        assert!(uuid::Uuid::parse_str(&client.session_id()).is_ok());
    }

    #[test]
    fn reset_replaces_session() {
        let client = client();
        let before = client.session_id();
        let after = client.reset_session();
        assert_ne!(before, after);
        assert_eq!(client.session_id(), after);
    }

    #[test]
    fn explicit_session_is_kept() {
        let client = client();
        client.set_session_id("conversation-7");
        assert_eq!(client.session_id(), "conversation-7");
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(client().base_url, "http://127.0.0.1:8000");
    }
}
