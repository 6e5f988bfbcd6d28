//! Extractor - summarizes retrieved material for one query
//!
//! Yields running summaries that end in the final one. Failures never
//! propagate: they become a single error sentence flagged as failed.

use crate::llm::{strip_think, estimate_tokens, GenConf, Generator};
use crate::prompts::Prompts;
use crate::types::{Chunk, ChatMessage, ChunkInfo};
use deepforge_common::config::ResearchConfig;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Yielded when retrieval produced nothing to read
pub const NO_INFO: &str = "No relevant information found for this query.";

const ERROR_PREFIX: &str = "Error extracting information";

/// One partial (or final) summary
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub text: String,

    /// Set on the error sentence
    pub failed: bool,
}

impl Extraction {
    fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            failed: false,
        }
    }

    fn error(message: impl std::fmt::Display) -> Self {
        Self {
            text: format!("{}: {}", ERROR_PREFIX, message),
            failed: true,
        }
    }
}

pub struct Extractor {
    generator: Arc<dyn Generator>,
    prompts: Arc<Prompts>,
    conf: GenConf,
    document_budget: usize,
    streaming: bool,
}

impl Extractor {
    pub fn new(generator: Arc<dyn Generator>, prompts: Arc<Prompts>, conf: GenConf, config: &ResearchConfig) -> Self {
        Self {
            generator,
            prompts,
            conf,
            document_budget: config.document_token_budget,
            streaming: config.stream_extraction,
        }
    }

    /// Summaries of `info` for `query`, in generation order
    pub async fn stream_extract(
        &self,
        prev_context: &str,
        query: &str,
        info: &ChunkInfo,
    ) -> BoxStream<'static, Extraction> {
        let document = render_document(info, self.document_budget);
        if document.is_empty() {
            debug!(query = %query, "Nothing retrieved, skipping extraction");
            return stream::once(future::ready(Extraction::partial(NO_INFO))).boxed();
        }

        let prompt = self.prompts.extraction(prev_context, query, &document);
        debug!(query = %query, prompt_tokens = estimate_tokens(&prompt), "Extracting");
        let history = [ChatMessage::user(prompt)];
        let system = &self.prompts.extraction_system;

        if !self.streaming {
            let item = match self.generator.chat(system, &history, &self.conf).await {
                Ok(text) => Extraction::partial(strip_think(&text).trim()),
                Err(e) => {
                    warn!(query = %query, error = %e, "Extraction failed");
                    Extraction::error(e)
                }
            };
            return stream::once(future::ready(item)).boxed();
        }

        let partials = match self.generator.chat_streamly(system, &history, &self.conf).await {
            Ok(partials) => partials,
            Err(e) => {
                warn!(query = %query, error = %e, "Extraction failed");
                return stream::once(future::ready(Extraction::error(e))).boxed();
            }
        };

        partials
            .scan(false, |failed, item| {
                if *failed {
                    return future::ready(None);
                }
                let next = match item {
                    Ok(text) => {
                        let cleaned = strip_think(&text).trim();
                        (!cleaned.is_empty()).then(|| Extraction::partial(cleaned))
                    }
                    Err(e) => {
                        warn!(error = %e, "Extraction stream broke off");
                        *failed = true;
                        Some(Extraction::error(e))
                    }
                };
                future::ready(Some(next))
            })
            .filter_map(future::ready)
            .boxed()
    }
}

fn title<'a>(chunk: &'a Chunk, info: &'a ChunkInfo) -> &'a str {
    info.doc_name(&chunk.doc_id)
        .or_else(|| chunk.metadata.get("docnm_kwd").and_then(|v| v.as_str()))
        .filter(|t| !t.is_empty())
        .unwrap_or(&chunk.doc_id)
}

/// The first `words` whitespace-delimited words of `text`
fn leading_words(text: &str, words: usize) -> &str {
    let mut seen = 0;
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if !c.is_whitespace() {
            in_word = true;
            continue;
        }
        if in_word {
            seen += 1;
            in_word = false;
            if seen == words {
                return &text[..i];
            }
        }
    }
    text
}

/// Numbered document of the largest chunks, bounded by `budget` tokens
///
/// The chunk that crosses the budget is cut at a word boundary and ends the
/// document.
pub fn render_document(info: &ChunkInfo, budget: usize) -> String {
    let mut chunks: Vec<&Chunk> = info.chunks.iter().filter(|c| !c.content.trim().is_empty()).collect();
    chunks.sort_by(|a, b| b.content.len().cmp(&a.content.len()));

    let mut used = 0;
    let mut sections = Vec::new();
    for chunk in chunks {
        let remaining = budget.saturating_sub(used);
        if remaining == 0 {
            break;
        }
        let content = chunk.content.trim();
        let cost = estimate_tokens(content);
        let body = if cost > remaining {
            debug!(chunk_id = %chunk.chunk_id, tokens = cost, remaining, "Truncating chunk to fit document");
            leading_words(content, remaining)
        } else {
            content
        };
        used += cost.min(remaining);
        sections.push(format!(
            "ID: {}\n├── Title: {}\n└── Content:\n{}",
            sections.len(),
            title(chunk, info),
            body
        ));
    }

    sections.join("\n\n")
}
