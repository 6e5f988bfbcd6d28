//! Retrieval back-end contracts
//!
//! Each back-end is optional. The gateway treats an error from any of them
//! as a failed source and keeps going with what the others returned.

mod http;
mod tavily;

pub use http::{HttpKnowledgeBase, HttpKnowledgeGraph};
pub use tavily::TavilyWebSearch;

use crate::types::{Chunk, ChunkInfo};
use async_trait::async_trait;
use deepforge_common::errors::Result;

/// Knowledge-base retriever over a document collection
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<ChunkInfo>;
}

/// Web search retriever
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn retrieve_chunks(&self, query: &str) -> Result<ChunkInfo>;
}

/// Knowledge-graph retriever yielding at most one synthesized chunk
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn retrieve(&self, question: &str) -> Result<Option<Chunk>>;
}
