//! Chunk Merger & Ranker
//!
//! Folds a fresh retrieval into the session accumulator. Chunks are unique
//! by `chunk_id` and document aggregations by `doc_id`.

use crate::types::{Chunk, ChunkInfo, DocAgg};
use deepforge_common::embeddings::Embedder;
use deepforge_common::errors::{AppError, Result};
use std::collections::HashSet;

/// Characters of content that earn the full length bonus
const LENGTH_SATURATION: f64 = 1000.0;

/// Largest contribution of the length bonus
const LENGTH_WEIGHT: f64 = 0.3;

/// Lowercased alphanumeric tokens
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union
}

/// Token overlap with the query plus a bonus for longer passages, in [0, 1]
pub fn relevance(content: &str, query: &str) -> f64 {
    let overlap = jaccard(&tokenize(content), &tokenize(query));
    let length = (content.chars().count() as f64 / LENGTH_SATURATION).min(1.0);
    (overlap + length * LENGTH_WEIGHT).clamp(0.0, 1.0)
}

/// Cosine similarity clamped to [0, 1]; zero for empty or mismatched vectors
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0)
}

/// Embedding similarity between `content` and `query`, in [0, 1]
pub async fn semantic_relevance(embedder: &dyn Embedder, content: &str, query: &str) -> Result<f64> {
    let (vectors, _) = embedder.encode(&[content.to_string(), query.to_string()]).await?;
    match vectors.as_slice() {
        [text, query] => Ok(cosine(text, query)),
        other => Err(AppError::EmbeddingError {
            message: format!("expected 2 vectors, got {}", other.len()),
        }),
    }
}

fn merge_doc_aggs(acc: &mut Vec<DocAgg>, incoming: Vec<DocAgg>) {
    let mut seen: HashSet<String> = acc.iter().map(|d| d.doc_id.clone()).collect();
    for agg in incoming {
        if seen.insert(agg.doc_id.clone()) {
            acc.push(agg);
        }
    }
}

/// Merge `incoming`, retrieved for `query`, into `acc`
pub fn merge(acc: &mut ChunkInfo, incoming: ChunkInfo, query: &str) {
    merge_doc_aggs(&mut acc.doc_aggs, incoming.doc_aggs);

    let mut seen: HashSet<String> = acc.chunks.iter().map(|c| c.chunk_id.clone()).collect();

    // First retrieval of the session is taken as delivered
    if acc.chunks.is_empty() {
        acc.chunks = incoming
            .chunks
            .into_iter()
            .filter(|c| seen.insert(c.chunk_id.clone()))
            .collect();
        return;
    }

    let fresh: Vec<Chunk> = incoming
        .chunks
        .into_iter()
        .filter(|c| seen.insert(c.chunk_id.clone()))
        .map(|mut c| {
            c.confidence = Some(relevance(&c.content, query));
            c
        })
        .collect();

    if fresh.is_empty() {
        return;
    }

    acc.chunks.extend(fresh);
    acc.chunks.sort_by(|a, b| b.score().total_cmp(&a.score()));
}
