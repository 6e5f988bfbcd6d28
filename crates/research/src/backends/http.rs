//! JSON-over-HTTP knowledge base and knowledge graph clients

use super::{KnowledgeBase, KnowledgeGraph};
use crate::types::{Chunk, ChunkInfo};
use async_trait::async_trait;
use deepforge_common::errors::{AppError, Result};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

async fn post_json<B: Serialize>(
    client: &reqwest::Client,
    backend: &str,
    endpoint: &str,
    body: &B,
) -> Result<Option<Value>> {
    let response = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .map_err(|e| AppError::retrieval(backend, format!("request failed: {}", e)))?;

    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(AppError::retrieval(backend, format!("HTTP {}: {}", status, text)));
    }

    let value: Value = response
        .json()
        .await
        .map_err(|e| AppError::retrieval(backend, format!("invalid response body: {}", e)))?;

    Ok((!value.is_null()).then_some(value))
}

#[derive(Serialize)]
struct KbRequest<'a> {
    question: &'a str,
    top_k: usize,
}

/// Knowledge base reachable at a single retrieval endpoint
pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    endpoint: String,
    top_k: usize,
}

impl HttpKnowledgeBase {
    pub fn new(endpoint: impl Into<String>, top_k: usize, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
            top_k,
        })
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    async fn retrieve(&self, question: &str) -> Result<ChunkInfo> {
        let body = KbRequest {
            question,
            top_k: self.top_k,
        };
        let Some(value) = post_json(&self.client, "knowledge_base", &self.endpoint, &body).await? else {
            return Ok(ChunkInfo::default());
        };

        let info: ChunkInfo = serde_json::from_value(value)
            .map_err(|e| AppError::retrieval("knowledge_base", format!("unexpected payload: {}", e)))?;
        debug!(chunks = info.chunks.len(), docs = info.doc_aggs.len(), "Knowledge base answered");
        Ok(info)
    }
}

#[derive(Serialize)]
struct KgRequest<'a> {
    question: &'a str,
}

/// Knowledge graph that answers with one summarizing chunk
pub struct HttpKnowledgeGraph {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpKnowledgeGraph {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into(),
        })
    }
}

/// Graph payload to chunk; `None` when it carries no content
fn graph_chunk(value: Value) -> Result<Option<Chunk>> {
    let chunk: Chunk = serde_json::from_value(value)
        .map_err(|e| AppError::retrieval("knowledge_graph", format!("unexpected payload: {}", e)))?;
    Ok((!chunk.content.trim().is_empty()).then_some(chunk))
}

#[async_trait]
impl KnowledgeGraph for HttpKnowledgeGraph {
    async fn retrieve(&self, question: &str) -> Result<Option<Chunk>> {
        match post_json(&self.client, "knowledge_graph", &self.endpoint, &KgRequest { question }).await? {
            Some(value) => graph_chunk(value),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_graph_chunk() {
        let chunk = graph_chunk(json!({
            "chunk_id": "kg-0",
            "content_with_weight": "Moon --gravity--> Ocean",
        }))
        .unwrap()
        .unwrap();
        assert_eq!(chunk.content, "Moon --gravity--> Ocean");

        let blank = graph_chunk(json!({"chunk_id": "kg-1", "content_with_weight": "  "})).unwrap();
        assert!(blank.is_none());

        assert!(graph_chunk(json!({"content_with_weight": "no id"})).is_err());
    }

    #[test]
    fn test_kb_payload_shape() {
        let info: ChunkInfo = serde_json::from_value(json!({
            "chunks": [{"chunk_id": "c1", "doc_id": "d1", "content": "Tides rise twice daily."}],
            "doc_aggs": [{"doc_id": "d1", "doc_name": "Tides 101", "count": 1}]
        }))
        .unwrap();
        assert_eq!(info.chunks.len(), 1);
        assert_eq!(info.doc_name("d1"), Some("Tides 101"));
    }
}
