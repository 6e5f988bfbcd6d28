//! Retrieval Gateway
//!
//! Fans one query out to the configured back-ends in parallel and merges
//! their answers as graph chunk first, then knowledge base, then web.

use crate::backends::{KnowledgeBase, KnowledgeGraph, WebSearch};
use crate::types::{Chunk, ChunkInfo};
use deepforge_common::config::ResearchConfig;
use deepforge_common::errors::{AppError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one gateway call
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub info: ChunkInfo,

    /// Names of the back-ends that raised or timed out
    pub failures: Vec<String>,

    /// Number of back-ends consulted
    pub backends: usize,
}

impl Retrieval {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct RetrievalGateway {
    kb: Option<Arc<dyn KnowledgeBase>>,
    web: Option<Arc<dyn WebSearch>>,
    kg: Option<Arc<dyn KnowledgeGraph>>,
    kb_attempts: u32,
    timeout: Duration,
}

impl Default for RetrievalGateway {
    fn default() -> Self {
        Self {
            kb: None,
            web: None,
            kg: None,
            kb_attempts: 2,
            timeout: Duration::from_secs(30),
        }
    }
}

impl RetrievalGateway {
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            kb_attempts: config.kb_attempts.max(1),
            timeout: config.backend_timeout(),
            ..Self::default()
        }
    }

    pub fn with_knowledge_base(mut self, kb: Arc<dyn KnowledgeBase>) -> Self {
        self.kb = Some(kb);
        self
    }

    pub fn with_web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_knowledge_graph(mut self, kg: Arc<dyn KnowledgeGraph>) -> Self {
        self.kg = Some(kg);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn configured(&self) -> usize {
        [self.kb.is_some(), self.web.is_some(), self.kg.is_some()]
            .into_iter()
            .filter(|c| *c)
            .count()
    }

    async fn deadline<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout {
                operation: operation.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn query_kb(&self, query: &str) -> Option<Result<ChunkInfo>> {
        let kb = self.kb.as_ref()?;
        let mut last_error = None;

        for attempt in 1..=self.kb_attempts {
            match self.deadline("knowledge_base", kb.retrieve(query)).await {
                Ok(info) => return Some(Ok(info)),
                Err(e) => {
                    warn!(query = %query, attempt, error = %e, "Knowledge base retrieval failed");
                    last_error = Some(e);
                }
            }
        }

        last_error.map(Err)
    }

    async fn query_web(&self, query: &str) -> Option<Result<ChunkInfo>> {
        let web = self.web.as_ref()?;
        Some(self.deadline("web_search", web.retrieve_chunks(query)).await)
    }

    async fn query_kg(&self, query: &str) -> Option<Result<Option<Chunk>>> {
        let kg = self.kg.as_ref()?;
        Some(self.deadline("knowledge_graph", kg.retrieve(query)).await)
    }

    /// Query every configured back-end; failures are recorded, never raised
    pub async fn retrieve(&self, query: &str) -> Retrieval {
        let (kb, web, kg) = tokio::join!(self.query_kb(query), self.query_web(query), self.query_kg(query));

        let mut retrieval = Retrieval {
            backends: self.configured(),
            ..Retrieval::default()
        };

        match kg {
            Some(Ok(Some(chunk))) if !chunk.content.trim().is_empty() => retrieval.info.chunks.push(chunk),
            Some(Ok(_)) | None => {}
            Some(Err(e)) => {
                warn!(query = %query, error = %e, "Knowledge graph retrieval failed");
                retrieval.failures.push("knowledge_graph".to_string());
            }
        }

        for (name, outcome) in [("knowledge_base", kb), ("web_search", web)] {
            match outcome {
                Some(Ok(info)) => {
                    retrieval.info.chunks.extend(info.chunks);
                    retrieval.info.doc_aggs.extend(info.doc_aggs);
                }
                Some(Err(e)) => {
                    if name == "web_search" {
                        warn!(query = %query, error = %e, "Web search failed");
                    }
                    retrieval.failures.push(name.to_string());
                }
                None => {}
            }
        }

        debug!(
            query = %query,
            chunks = retrieval.info.chunks.len(),
            failures = retrieval.failures.len(),
            "Retrieval finished"
        );
        retrieval
    }
}
