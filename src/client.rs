use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::error::{AnalystError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn is_system(self) -> bool {
        matches!(self, Role::System)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One increment of a streamed completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Reasoning(String),
    Answer(String),
    /// Role-only or usage-only events carry no text.
    Empty,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Opens streaming chat completions. No retries and no timeout of its own.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChunkStream>;
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    reasoning_content: Option<String>,
    content: Option<String>,
}

/// Maps one SSE event payload to a chunk. `None` marks the `[DONE]` sentinel.
fn parse_event_data(data: &str) -> Result<Option<Chunk>> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(None);
    }
    if data.is_empty() {
        return Ok(Some(Chunk::Empty));
    }
    let event: StreamEvent =
        serde_json::from_str(data).map_err(|e| AnalystError::MalformedStream(format!("{e}: {data}")))?;
    let Some(choice) = event.choices.into_iter().next() else {
        return Ok(Some(Chunk::Empty));
    };
    let chunk = match (choice.delta.reasoning_content, choice.delta.content) {
        (Some(reasoning), _) if !reasoning.is_empty() => Chunk::Reasoning(reasoning),
        (_, Some(content)) if !content.is_empty() => Chunk::Answer(content),
        _ => Chunk::Empty,
    };
    Ok(Some(chunk))
}

/// Decodes a chat-completions SSE body into chunks, ending at `[DONE]` or when the body closes.
fn sse_chunks<S, B>(bytes: S) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let chunks = bytes
        .eventsource()
        .map(|event| match event {
            Ok(event) => parse_event_data(&event.data),
            Err(EventStreamError::Transport(e)) => {
                error!("Stream error: {}", e);
                Err(AnalystError::Transport(e))
            }
            Err(e) => Err(AnalystError::MalformedStream(e.to_string())),
        })
        .take_while(|item| future::ready(!matches!(item, Ok(None))))
        .map(|item| item.map(|chunk| chunk.unwrap_or(Chunk::Empty)));
    Box::pin(chunks)
}

/// OpenAI-compatible chat completion client for the DeepSeek API.
#[derive(Clone)]
pub struct DeepSeekClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DeepSeekClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionBackend for DeepSeekClient {
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn stream_chat(&self, model: &str, messages: &[ChatMessage]) -> Result<ChunkStream> {
        let request_body = json!({
            "model": model,
            "messages": messages,
            "stream": true
        });

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Chat completion request failed");
            return Err(AnalystError::Status { status, body });
        }

        debug!(%status, "Chat completion stream opened");
        Ok(sse_chunks(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frames(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, reqwest::Error>> + Send + 'static {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect::<Vec<_>>())
    }

    async fn collect(parts: &[&str]) -> Vec<Chunk> {
        sse_chunks(frames(parts)).map(|c| c.unwrap()).collect().await
    }

    #[test]
    fn test_reasoning_takes_precedence() {
        let data = r#"{"choices":[{"delta":{"reasoning_content":"想","content":"答"}}]}"#;
        assert_eq!(parse_event_data(data).unwrap(), Some(Chunk::Reasoning("想".to_string())));
    }

    #[test]
    fn test_content_and_empty_deltas() {
        let data = r#"{"choices":[{"delta":{"reasoning_content":null,"content":"答"}}]}"#;
        assert_eq!(parse_event_data(data).unwrap(), Some(Chunk::Answer("答".to_string())));

        let data = r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#;
        assert_eq!(parse_event_data(data).unwrap(), Some(Chunk::Empty));

        let data = r#"{"choices":[],"usage":{"total_tokens":12}}"#;
        assert_eq!(parse_event_data(data).unwrap(), Some(Chunk::Empty));
    }

    #[test]
    fn test_done_and_malformed_payloads() {
        assert_eq!(parse_event_data("[DONE]").unwrap(), None);
        assert!(matches!(parse_event_data("{not json"), Err(AnalystError::MalformedStream(_))));
    }

    #[tokio::test]
    async fn test_events_split_across_frames() {
        let chunks = collect(&[
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"a\"}}]}\n\ndata: {\"choi",
            "ces\":[{\"delta\":{\"content\":\"b\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ])
        .await;
        assert_eq!(chunks, vec![Chunk::Reasoning("a".to_string()), Chunk::Answer("b".to_string())]);
    }

    #[tokio::test]
    async fn test_multi_line_data_is_joined_into_one_event() {
        let chunks = collect(&["data: {\"choices\":[{\"delta\":\ndata: {\"content\":\"x\"}}]}\n\n"]).await;
        assert_eq!(chunks, vec![Chunk::Answer("x".to_string())]);
    }

    #[tokio::test]
    async fn test_stream_ends_when_transport_closes_without_done() {
        let chunks = collect(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]).await;
        assert_eq!(chunks, vec![Chunk::Answer("x".to_string())]);
    }

    #[tokio::test]
    async fn test_malformed_event_is_an_error() {
        let mut stream = sse_chunks(frames(&["data: {\"choices\": [\n\n"]));
        assert!(matches!(stream.next().await, Some(Err(AnalystError::MalformedStream(_)))));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let value = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }
}
