//! Core data model shared by every stage of the research loop

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque retriever-supplied fields carried through untouched
pub type Metadata = Map<String, Value>;

/// A retrievable passage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within a session; duplicates are dropped on merge
    pub chunk_id: String,

    /// Originating document
    #[serde(default)]
    pub doc_id: String,

    /// Passage text
    #[serde(alias = "content_with_weight")]
    pub content: String,

    /// Relevance in [0, 1], when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    #[serde(flatten)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(chunk_id: impl Into<String>, doc_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            doc_id: doc_id.into(),
            content: content.into(),
            confidence: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Confidence used for ranking; unknown ranks lowest
    pub fn score(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }
}

/// Per-document summary used for reference lists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocAgg {
    pub doc_id: String,

    #[serde(default)]
    pub doc_name: String,

    #[serde(default)]
    pub count: usize,

    #[serde(flatten)]
    pub metadata: Metadata,
}

impl DocAgg {
    pub fn new(doc_id: impl Into<String>, doc_name: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            doc_name: doc_name.into(),
            count: 1,
            metadata: Metadata::new(),
        }
    }
}

/// Retrieved material: chunks plus the documents they came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkInfo {
    #[serde(default)]
    pub chunks: Vec<Chunk>,

    #[serde(default)]
    pub doc_aggs: Vec<DocAgg>,
}

impl ChunkInfo {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.doc_aggs.is_empty()
    }

    /// Display name for a document, if the aggregation knows it
    pub fn doc_name(&self, doc_id: &str) -> Option<&str> {
        self.doc_aggs
            .iter()
            .find(|d| d.doc_id == doc_id && !d.doc_name.is_empty())
            .map(|d| d.doc_name.as_str())
    }
}

/// Evidence gathered for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Canonical query
    pub query: String,

    /// Leading chunks of the retrieval that produced this result
    pub sources: Vec<Chunk>,

    pub summary: String,

    /// Relevance of the summary to the query, in [0, 1]
    pub confidence: f64,

    /// Zero-based index of the step that executed the query
    pub step_index: usize,
}

/// Lifecycle of a reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Reasoning,
    Searching,
    Extracting,
    Completed,
    Error,
}

/// One reason/search/extract cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// 1-based and contiguous within a session
    pub step_id: usize,
    pub reasoning_text: String,
    pub queries: Vec<String>,
    pub results: Vec<SearchResult>,
    pub status: StepStatus,
}

impl ReasoningStep {
    pub fn new(step_id: usize, reasoning_text: impl Into<String>) -> Self {
        Self {
            step_id,
            reasoning_text: reasoning_text.into(),
            queries: Vec::new(),
            results: Vec::new(),
            status: StepStatus::Reasoning,
        }
    }

    /// Whether any result clears the given confidence
    pub fn has_confident_result(&self, threshold: f64) -> bool {
        self.results.iter().any(|r| r.confidence > threshold)
    }
}

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prompt/response turn fed to the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
