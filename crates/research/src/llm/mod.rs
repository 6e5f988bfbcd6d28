//! Generator abstraction
//!
//! The chat model is an external collaborator. Streaming calls yield the
//! running concatenation of the output so far, not deltas.

mod openai;

pub use openai::OpenAiChat;

use crate::types::ChatMessage;
use async_trait::async_trait;
use deepforge_common::config::LlmConfig;
use deepforge_common::errors::Result;
use futures::stream::BoxStream;

/// Closing marker of a chain-of-thought prefix
pub const THINK_CLOSE: &str = "</think>";

/// Running-concatenation stream
pub type TextStream = BoxStream<'static, Result<String>>;

/// Generation parameters
#[derive(Debug, Clone)]
pub struct GenConf {
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl Default for GenConf {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

impl GenConf {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: None,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Full-response completion
    async fn chat(&self, system: &str, history: &[ChatMessage], conf: &GenConf) -> Result<String>;

    /// Streaming completion
    async fn chat_streamly(
        &self,
        system: &str,
        history: &[ChatMessage],
        conf: &GenConf,
    ) -> Result<TextStream>;

    /// Context window in tokens
    fn max_length(&self) -> usize;

    fn llm_name(&self) -> &str;
}

/// Drop everything up to and including the last `</think>`
pub fn strip_think(text: &str) -> &str {
    match text.rfind(THINK_CLOSE) {
        Some(i) => &text[i + THINK_CLOSE.len()..],
        None => text,
    }
}

/// Whitespace-token estimate used by every soft budget
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}
