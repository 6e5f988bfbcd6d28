//! OpenAI-compatible chat client
//!
//! `chat` posts a plain completion request. `chat_streamly` sets
//! `stream: true` and parses the server-sent events body.

use super::{GenConf, Generator, TextStream};
use crate::types::{ChatMessage, Role};
use async_trait::async_trait;
use deepforge_common::config::LlmConfig;
use deepforge_common::errors::{AppError, Result};
use eventsource_stream::Eventsource;
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    max_length: usize,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.endpoint.trim_end_matches('/')),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            max_length: config.max_length,
        })
    }

    fn request<'a>(
        &'a self,
        system: &'a str,
        history: &'a [ChatMessage],
        conf: &GenConf,
        stream: bool,
    ) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            messages.push(WireMessage {
                role: Role::System,
                content: system,
            });
        }
        messages.extend(history.iter().map(|m| WireMessage {
            role: m.role,
            content: &m.content,
        }));

        ChatRequest {
            model: &self.model,
            messages,
            temperature: conf.temperature,
            max_tokens: conf.max_tokens,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let mut request = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::generator(format!("LLM API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::generator(format!("LLM API error {}: {}", status, body)));
        }

        Ok(response)
    }
}

/// Content delta of one SSE payload
fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| AppError::generator(format!("SSE parsing error: {}, data: {}", e, data)))?;

    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AppError::generator(format!("SSE API error: {}", message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty()))
}

#[async_trait]
impl Generator for OpenAiChat {
    async fn chat(&self, system: &str, history: &[ChatMessage], conf: &GenConf) -> Result<String> {
        let body = self.request(system, history, conf, false);
        let response: ChatResponse = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::generator(format!("Failed to parse LLM response: {}", e)))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::generator("Empty response from LLM"))
    }

    async fn chat_streamly(
        &self,
        system: &str,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<TextStream> {
        let body = self.request(system, history, conf, true);
        let response = self.send(&body).await?;
        debug!(model = %self.model, messages = history.len(), "Streaming completion started");

        let stream = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(e) if e.data.trim() == DONE_SENTINEL))
            })
            .map(|event| match event {
                Ok(event) => parse_delta(&event.data),
                Err(e) => Err(AppError::generator(format!("SSE stream error: {}", e))),
            })
            .scan(String::new(), |answer, delta| {
                let item = match delta {
                    Ok(Some(piece)) => {
                        answer.push_str(&piece);
                        Some(Ok(answer.clone()))
                    }
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                };
                future::ready(Some(item))
            })
            .filter_map(future::ready)
            .boxed();

        Ok(stream)
    }

    fn max_length(&self) -> usize {
        self.max_length
    }

    fn llm_name(&self) -> &str {
        &self.model
    }
}
