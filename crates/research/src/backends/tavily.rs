//! Tavily-style web search
//!
//! Hits are keyed by the SHA-256 of their URL, so the same page found by two
//! queries merges into a single chunk.

use super::WebSearch;
use crate::types::{Chunk, ChunkInfo, DocAgg};
use async_trait::async_trait;
use deepforge_common::cache::keys;
use deepforge_common::config::WebSearchConfig;
use deepforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
}

pub struct TavilyWebSearch {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

impl TavilyWebSearch {
    /// `None` when no API key is configured
    pub fn from_config(config: &WebSearchConfig, timeout: Duration) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            max_results: config.max_results,
        }))
    }
}

fn hits_to_chunks(hits: Vec<SearchHit>) -> ChunkInfo {
    let mut info = ChunkInfo::default();
    let mut seen = HashSet::new();

    for hit in hits {
        if hit.url.is_empty() || hit.content.trim().is_empty() {
            continue;
        }
        let id = keys::text_hash(&hit.url);
        if !seen.insert(id.clone()) {
            continue;
        }

        let title = if hit.title.is_empty() { hit.url.clone() } else { hit.title };
        let mut chunk = Chunk::new(id.clone(), id.clone(), hit.content)
            .with_meta("docnm_kwd", title.clone())
            .with_meta("url", hit.url.clone());
        chunk.confidence = hit.score.map(|s| s.clamp(0.0, 1.0));

        let mut agg = DocAgg::new(id, title);
        agg.metadata.insert("url".to_string(), hit.url.into());

        info.chunks.push(chunk);
        info.doc_aggs.push(agg);
    }

    info
}

#[async_trait]
impl WebSearch for TavilyWebSearch {
    async fn retrieve_chunks(&self, query: &str) -> Result<ChunkInfo> {
        let body = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
            search_depth: "advanced",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::retrieval("web", format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::retrieval("web", format!("HTTP {}: {}", status, text)));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::retrieval("web", format!("invalid response body: {}", e)))?;

        Ok(hits_to_chunks(parsed.results))
    }
}
