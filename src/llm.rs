use crate::events::{Message, ModelDescriptor};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};

/// Events emitted during LLM streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmEvent {
    /// Text delta from streaming response
    TextDelta(String),
    /// Stream completed
    StreamComplete,
    /// Error occurred; no further events follow
    Error(String),
}

/// Errors raised while talking to the model server
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("malformed response chunk: {0}")]
    MalformedChunk(#[from] serde_json::Error),

    #[error("{0}")]
    Server(String),

    #[error("stream ended before completion")]
    Interrupted,
}

/// Body of a streaming chat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn streaming(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}

/// A model server able to stream chat completions.
///
/// The returned receiver yields `TextDelta`s and ends with exactly one
/// `StreamComplete` or `Error`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(
        &self,
        base_url: &str,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError>;
}

/// One line of Ollama's newline-delimited chat response
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// HTTP client for an Ollama-compatible server
#[derive(Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new() -> Result<Self, LlmError> {
        // Only connecting is bounded; a response may stream for as long as the model runs.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client })
    }

    fn endpoint(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    /// Models installed on the server
    pub async fn list_models(&self, base_url: &str) -> Result<Vec<ModelDescriptor>, LlmError> {
        let response = self
            .client
            .get(Self::endpoint(base_url, "/api/tags"))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let tags: TagsResponse = serde_json::from_str(&response.text().await?)?;
        Ok(tags
            .models
            .into_iter()
            .map(|entry| ModelDescriptor::new(entry.name.clone(), entry.name))
            .collect())
    }

    /// Forward Ollama's newline-delimited JSON stream.
    ///
    /// Lines are split on raw bytes and decoded whole, so a character split
    /// across two network chunks arrives intact.
    async fn forward_ndjson<S, B>(stream: S, tx: mpsc::Sender<LlmEvent>) -> Result<(), LlmError>
    where
        S: Stream<Item = Result<B, reqwest::Error>>,
        B: AsRef<[u8]>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(chunk?.as_ref());

            while let Some(newline_pos) = buffer.iter().position(|&byte| byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                if Self::process_line(&line, &tx).await? {
                    return Ok(());
                }
            }
        }

        // Last line may lack a trailing newline
        if Self::process_line(&buffer, &tx).await? {
            return Ok(());
        }

        let _ = tx.send(LlmEvent::StreamComplete).await;
        Ok(())
    }

    /// Forward one line; returns true once the stream is finished
    async fn process_line(line: &[u8], tx: &mpsc::Sender<LlmEvent>) -> Result<bool, LlmError> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(false);
        }

        let chunk: ChatChunk = serde_json::from_slice(line)?;
        if let Some(error) = chunk.error {
            return Err(LlmError::Server(error));
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                let _ = tx.send(LlmEvent::TextDelta(message.content)).await;
            }
        }

        if chunk.done {
            let _ = tx.send(LlmEvent::StreamComplete).await;
            return Ok(true);
        }

        Ok(false)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn stream_chat(
        &self,
        base_url: &str,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<LlmEvent>, LlmError> {
        let url = Self::endpoint(base_url, "/api/chat");
        debug!(%url, model = %request.model, "opening chat stream");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            let tx_clone = tx.clone();
            if let Err(e) = Self::forward_ndjson(response.bytes_stream(), tx).await {
                warn!(error = %e, "chat stream failed");
                let _ = tx_clone.send(LlmEvent::Error(e.to_string())).await;
            }
        });

        Ok(rx)
    }
}
