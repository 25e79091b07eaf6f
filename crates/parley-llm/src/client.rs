use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::stream::{parse_sse_line, SseParsed, TokenEvent, TokenReader};

const CHAT_PATH: &str = "/v1/chat/completions";
const MODELS_PATH: &str = "/v1/models";

/// How much of an upstream error body is kept in the error message.
const BODY_EXCERPT_CHARS: usize = 256;

/// One prompt entry on the upstream wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A model advertised by the upstream catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub created_at: i64,
}

/// Client for an OpenAI-compatible completions API.
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Fetch the model catalogue.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}{}", self.base_url, MODELS_PATH);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let out: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(out
            .data
            .into_iter()
            .map(|m| ModelInfo {
                id: m.id,
                created_at: m.created,
            })
            .collect())
    }

    /// Non-streaming completion. Returns the first choice's content.
    pub async fn completion(&self, model: &str, messages: &[Message]) -> Result<String> {
        let url = format!("{}{}", self.base_url, CHAT_PATH);
        debug!(model, "sending completion request");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model,
                messages,
                stream: false,
            })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let out: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        out.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("empty completion response".to_string()))
    }

    /// Streaming completion. The returned reader yields one event per SSE
    /// frame until the `[DONE]` sentinel or end-of-stream; cancelling the
    /// token (or closing the reader) aborts the in-flight request.
    pub async fn completion_stream(
        &self,
        model: &str,
        messages: &[Message],
        cancel: CancellationToken,
    ) -> Result<TokenReader> {
        let url = format!("{}{}", self.base_url, CHAT_PATH);
        debug!(model, "sending streaming completion request");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model,
                messages,
                stream: true,
            })
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let (tx, rx) = mpsc::channel(64);
        let child = cancel.child_token();
        tokio::spawn(process_stream(resp, child.clone(), tx));
        Ok(TokenReader::new(rx, child))
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "upstream API error");
    Err(LlmError::Api {
        status: status.as_u16(),
        message: body.chars().take(BODY_EXCERPT_CHARS).collect(),
    })
}

/// Read loop: split the byte stream into SSE lines, decode `data:` frames,
/// and forward token events until the sentinel, EOF, or cancellation.
async fn process_stream(
    resp: reqwest::Response,
    cancel: CancellationToken,
    tx: mpsc::Sender<TokenEvent>,
) {
    use futures_util::StreamExt;

    let mut byte_stream = resp.bytes_stream();
    let mut line_buf = String::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = byte_stream.next() => chunk,
        };
        let chunk = match chunk {
            None => break,
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                let _ = tx
                    .send(TokenEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    let _ = tx.send(TokenEvent::Done).await;
                    return;
                }
                if let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) {
                    for choice in &chunk_resp.choices {
                        if let Some(content) = &choice.delta.content {
                            if content.is_empty() {
                                continue;
                            }
                            debug!(len = content.len(), "stream text delta");
                            let event = TokenEvent::Delta {
                                text: content.clone(),
                            };
                            if tx.send(event).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let _ = tx.send(TokenEvent::Done).await;
}

// Upstream API types

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    created: i64,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn user(content: &str) -> Vec<Message> {
        vec![Message::new("user", content)]
    }

    #[tokio::test]
    async fn completion_returns_first_choice_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .json_body_includes(r#"{"model":"gpt-test","stream":false}"#);
                then.status(200).json_body(json!({
                    "choices": [{"message": {"role": "assistant", "content": "hello"}}]
                }));
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let reply = client.completion("gpt-test", &user("hi")).await.unwrap();
        assert_eq!(reply, "hello");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn completion_empty_choices_is_parse_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"choices": []}));
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let err = client.completion("gpt-test", &user("hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Parse(_)));
    }

    #[tokio::test]
    async fn non_2xx_carries_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(500).body("upstream exploded");
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let err = client.completion("gpt-test", &user("hi")).await.unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn stream_yields_deltas_in_order_then_done() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"he\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let mut reader = client
            .completion_stream("gpt-test", &user("hi"), CancellationToken::new())
            .await
            .unwrap();

        let mut deltas = Vec::new();
        loop {
            match reader.next().await {
                Some(TokenEvent::Delta { text }) => deltas.push(text),
                Some(TokenEvent::Done) => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(deltas, vec!["he", "llo"]);
    }

    #[tokio::test]
    async fn immediate_sentinel_yields_done_only() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body("data: [DONE]\n\n");
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let mut reader = client
            .completion_stream("gpt-test", &user("hi"), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(reader.next().await, Some(TokenEvent::Done)));
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn streaming_http_error_surfaces_before_any_event() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(503).body("overloaded");
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let err = client
            .completion_stream("gpt-test", &user("hi"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn list_models_maps_created_timestamps() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/models");
                then.status(200).json_body(json!({
                    "object": "list",
                    "data": [
                        {"id": "gpt-a", "object": "model", "created": 1700000000},
                        {"id": "gpt-b", "object": "model", "created": 1710000000}
                    ]
                }));
            })
            .await;

        let client = OpenAiClient::new(server.base_url(), "test-key");
        let models = client.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt-a");
        assert_eq!(models[0].created_at, 1700000000);
    }
}
