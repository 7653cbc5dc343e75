use crate::config::AppConfig;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("HTTP request to model failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Model API error: {0}")]
    Provider(String),

    #[error("Malformed model response: {0}")]
    Malformed(String),

    #[error("Model returned no content")]
    EmptyResponse,
}

/// One image plus the prompt pair to send with it.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// `data:<mime>;base64,<payload>`
    pub image_url: String,
}

/// Text deltas of a streamed completion, in arrival order.
pub type DeltaStream = BoxStream<'static, Result<String, ModelError>>;

/// A vision-capable chat model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Blocks until the full completion is available.
    async fn complete(&self, request: &VisionRequest) -> Result<String, ModelError>;

    /// Starts a streamed completion and yields content deltas as they arrive.
    async fn complete_streaming(&self, request: &VisionRequest) -> Result<DeltaStream, ModelError>;

    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum ChatMessage<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart<'a>> },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ProviderError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

/// Error object some providers send in place of a chunk mid-stream.
#[derive(Deserialize)]
struct ProviderError {
    message: String,
}

#[derive(Deserialize, Default)]
struct Delta {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiVisionModel {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiVisionModel {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.openai_api_key.clone(),
            base_url: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn body<'a>(&'a self, request: &'a VisionRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage::System {
                    content: &request.system_prompt,
                },
                ChatMessage::User {
                    content: vec![
                        ContentPart::Text {
                            text: &request.user_prompt,
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: &request.image_url,
                            },
                        },
                    ],
                },
            ],
            max_tokens: self.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, ModelError> {
        debug!(model = %self.model, stream = body.stream, "Sending vision request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl VisionModel for OpenAiVisionModel {
    async fn complete(&self, request: &VisionRequest) -> Result<String, ModelError> {
        let response = self.send(&self.body(request, false)).await?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(e.to_string()))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ModelError::EmptyResponse)
    }

    async fn complete_streaming(&self, request: &VisionRequest) -> Result<DeltaStream, ModelError> {
        let response = self.send(&self.body(request, true)).await?;
        let mut bytes = response.bytes_stream();

        let deltas = async_stream::try_stream! {
            let mut buffer = SseLineBuffer::default();
            let mut finished = false;
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(ModelError::from)?;
                for payload in buffer.push(&chunk) {
                    if payload == "[DONE]" {
                        finished = true;
                        break 'read;
                    }
                    let parsed = parse_chunk(&payload)?;
                    finished |= parsed.finished;
                    if let Some(delta) = parsed.content {
                        yield delta;
                    }
                }
            }
            // Neither [DONE] nor a finish reason: the connection dropped
            if !finished {
                Err::<(), _>(ModelError::Malformed("stream ended early".to_string()))?;
            }
        };

        Ok(deltas.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Reassembles `data:` payloads from an SSE byte stream whose chunks may
/// split lines anywhere.
#[derive(Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

#[derive(Debug, PartialEq)]
struct ParsedChunk {
    content: Option<String>,
    finished: bool,
}

fn parse_chunk(payload: &str) -> Result<ParsedChunk, ModelError> {
    let chunk: ChunkResponse =
        serde_json::from_str(payload).map_err(|e| ModelError::Malformed(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(ModelError::Provider(error.message));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(ParsedChunk {
            content: None,
            finished: false,
        });
    };
    Ok(ParsedChunk {
        content: choice.delta.content.filter(|s| !s.is_empty()),
        finished: choice.finish_reason.is_some(),
    })
}
