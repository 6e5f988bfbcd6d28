//! Scripted in-memory collaborators for tests

use crate::backends::{KnowledgeBase, KnowledgeGraph, WebSearch};
use crate::llm::{GenConf, Generator, TextStream};
use crate::tags::TagSet;
use crate::types::{Chunk, ChatMessage, ChunkInfo, DocAgg};
use async_trait::async_trait;
use deepforge_common::errors::{AppError, Result};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn chunk(id: &str, doc: &str, content: &str) -> Chunk {
    Chunk::new(id, doc, content)
}

/// Running concatenations, one per whitespace-delimited piece
fn running(text: &str) -> Vec<String> {
    let mut acc = String::new();
    text.split_inclusive(char::is_whitespace)
        .map(|piece| {
            acc.push_str(piece);
            acc.clone()
        })
        .collect()
}

pub enum ReasoningTurn {
    Text(String),
    /// Fails before producing any token
    Fail,
    Panic,
}

pub enum ExtractionTurn {
    Text(String),
    Fail,
    /// Streams the text, then fails
    FailAfter(String),
}

/// Canned reasoning and extraction output, told apart by the system prompt
pub struct ScriptedGenerator {
    marker: String,
    reasoning: Mutex<VecDeque<ReasoningTurn>>,
    extraction: Mutex<VecDeque<ExtractionTurn>>,
    reasoning_calls: AtomicUsize,
    extraction_calls: AtomicUsize,
    extraction_prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reasoning: Vec<ReasoningTurn>, extraction: Vec<ExtractionTurn>) -> Self {
        Self {
            marker: TagSet::default().begin_query,
            reasoning: Mutex::new(reasoning.into()),
            extraction: Mutex::new(extraction.into()),
            reasoning_calls: AtomicUsize::new(0),
            extraction_calls: AtomicUsize::new(0),
            extraction_prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reasoning_calls(&self) -> usize {
        self.reasoning_calls.load(Ordering::SeqCst)
    }

    pub fn extraction_calls(&self) -> usize {
        self.extraction_calls.load(Ordering::SeqCst)
    }

    pub fn extraction_prompts(&self) -> Vec<String> {
        self.extraction_prompts.lock().unwrap().clone()
    }

    fn is_reasoning(&self, system: &str) -> bool {
        system.contains(&self.marker)
    }

    fn next_reasoning(&self) -> ReasoningTurn {
        self.reasoning_calls.fetch_add(1, Ordering::SeqCst);
        self.reasoning
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ReasoningTurn::Text(String::new()))
    }

    fn next_extraction(&self, history: &[ChatMessage]) -> ExtractionTurn {
        self.extraction_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(last) = history.last() {
            self.extraction_prompts.lock().unwrap().push(last.content.clone());
        }
        self.extraction
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExtractionTurn::Text("Summary of the retrieved passages.".to_string()))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn chat(&self, system: &str, history: &[ChatMessage], _conf: &GenConf) -> Result<String> {
        if self.is_reasoning(system) {
            return match self.next_reasoning() {
                ReasoningTurn::Text(text) => Ok(text),
                ReasoningTurn::Fail => Err(AppError::generator("scripted reasoning failure")),
                ReasoningTurn::Panic => panic!("scripted generator panic"),
            };
        }
        match self.next_extraction(history) {
            ExtractionTurn::Text(text) => Ok(text),
            ExtractionTurn::Fail | ExtractionTurn::FailAfter(_) => {
                Err(AppError::generator("scripted extraction failure"))
            }
        }
    }

    async fn chat_streamly(&self, system: &str, history: &[ChatMessage], _conf: &GenConf) -> Result<TextStream> {
        if self.is_reasoning(system) {
            return match self.next_reasoning() {
                ReasoningTurn::Text(text) => Ok(stream::iter(running(&text).into_iter().map(Ok)).boxed()),
                ReasoningTurn::Fail => Err(AppError::generator("scripted reasoning failure")),
                ReasoningTurn::Panic => panic!("scripted generator panic"),
            };
        }
        match self.next_extraction(history) {
            ExtractionTurn::Text(text) => Ok(stream::iter(running(&text).into_iter().map(Ok)).boxed()),
            ExtractionTurn::Fail => Err(AppError::generator("scripted extraction failure")),
            ExtractionTurn::FailAfter(text) => {
                let items = running(&text)
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(AppError::generator("connection reset"))));
                Ok(stream::iter(items).boxed())
            }
        }
    }

    fn max_length(&self) -> usize {
        8192
    }

    fn llm_name(&self) -> &str {
        "scripted"
    }
}

fn doc_aggs_for(chunks: &[Chunk]) -> Vec<DocAgg> {
    let mut aggs: Vec<DocAgg> = Vec::new();
    for c in chunks {
        match aggs.iter_mut().find(|a| a.doc_id == c.doc_id) {
            Some(agg) => agg.count += 1,
            None => aggs.push(DocAgg::new(c.doc_id.clone(), format!("Document {}", c.doc_id))),
        }
    }
    aggs
}

/// Knowledge base answering per query, with a fallback answer
#[derive(Default)]
pub struct MockKb {
    responses: HashMap<String, Vec<Chunk>>,
    default: Vec<Chunk>,
    failing: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockKb {
    pub fn with_default(chunks: Vec<Chunk>) -> Self {
        Self {
            default: chunks,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(mut self, query: &str, chunks: Vec<Chunk>) -> Self {
        self.responses.insert(query.to_string(), chunks);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeBase for MockKb {
    async fn retrieve(&self, question: &str) -> Result<ChunkInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(AppError::retrieval("knowledge_base", "index unavailable"));
        }
        let chunks = self.responses.get(question).cloned().unwrap_or_else(|| self.default.clone());
        Ok(ChunkInfo {
            doc_aggs: doc_aggs_for(&chunks),
            chunks,
        })
    }
}

pub struct MockWeb {
    chunks: Vec<Chunk>,
    failing: bool,
}

impl MockWeb {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks, failing: false }
    }

    pub fn failing() -> Self {
        Self {
            chunks: Vec::new(),
            failing: true,
        }
    }
}

#[async_trait]
impl WebSearch for MockWeb {
    async fn retrieve_chunks(&self, _query: &str) -> Result<ChunkInfo> {
        if self.failing {
            return Err(AppError::retrieval("web", "rate limited"));
        }
        Ok(ChunkInfo {
            doc_aggs: doc_aggs_for(&self.chunks),
            chunks: self.chunks.clone(),
        })
    }
}

pub struct MockKg {
    chunk: Option<Chunk>,
}

impl MockKg {
    pub fn new(chunk: Option<Chunk>) -> Self {
        Self { chunk }
    }
}

#[async_trait]
impl KnowledgeGraph for MockKg {
    async fn retrieve(&self, _question: &str) -> Result<Option<Chunk>> {
        Ok(self.chunk.clone())
    }
}
