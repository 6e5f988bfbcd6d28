//! Per-session state, owned exclusively by the orchestrator

use crate::cache::ResultCache;
use crate::types::{ChatMessage, ChunkInfo, ReasoningStep};
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Counters reported in the terminal event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetrics {
    /// Retrieval calls issued
    pub total_queries: usize,
    pub cache_hits: usize,

    /// Steps in which at least one back-end failed
    pub failed_retrievals: usize,

    /// Mean confidence over every recorded result
    pub avg_confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub question: String,
    pub message_history: Vec<ChatMessage>,

    /// Canonical queries sent to retrieval
    pub executed_queries: HashSet<String>,
    pub reasoning_history: Vec<ReasoningStep>,
    pub query_cache: ResultCache,
    pub chunk_info: ChunkInfo,
    pub metrics: SessionMetrics,
}

impl Session {
    pub fn new(question: impl Into<String>) -> Self {
        let question = question.into();
        Self {
            id: Uuid::new_v4(),
            message_history: vec![ChatMessage::user(format!("Question: \"{}\"\n", question))],
            question,
            executed_queries: HashSet::new(),
            reasoning_history: Vec::new(),
            query_cache: ResultCache::new(),
            chunk_info: ChunkInfo::default(),
            metrics: SessionMetrics::default(),
        }
    }

    /// 1-based id of the step about to run
    pub fn next_step_id(&self) -> usize {
        self.reasoning_history.len() + 1
    }

    pub fn push_step(&mut self, step: ReasoningStep) {
        debug_assert_eq!(step.step_id, self.next_step_id());
        self.reasoning_history.push(step);
    }

    /// Compute end-of-session aggregates
    pub fn finalize(&mut self) {
        let confidences: Vec<f64> = self
            .reasoning_history
            .iter()
            .flat_map(|s| s.results.iter().map(|r| r.confidence))
            .collect();

        self.metrics.avg_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
    }
}
