//! Query Normalizer & Dedup Index
//!
//! Canonical form is the identity of a query for dedup and caching:
//! lowercased, whitespace collapsed, trimmed.

use deepforge_common::config::ResearchConfig;
use std::collections::HashSet;
use tracing::debug;

/// Shortest canonical query accepted
pub const MIN_QUERY_LEN: usize = 3;

/// Similarity strictly above this marks a query as redundant
pub const REDUNDANCY_THRESHOLD: f64 = 0.8;

/// Lowercase and collapse internal whitespace
pub fn normalize(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical form, or `None` when shorter than `MIN_QUERY_LEN`
pub fn canonicalize(query: &str) -> Option<String> {
    canonicalize_with(query, MIN_QUERY_LEN)
}

pub fn canonicalize_with(query: &str, min_len: usize) -> Option<String> {
    let canonical = normalize(query);
    (canonical.chars().count() >= min_len).then_some(canonical)
}

/// Jaccard similarity over whitespace-split token sets
pub fn similarity(a: &str, b: &str) -> f64 {
    let left: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let right: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();

    intersection as f64 / union as f64
}

/// True iff some executed query is more similar than `threshold`
pub fn is_redundant<'a, I>(query: &str, executed: I, threshold: f64) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    executed.into_iter().any(|e| similarity(query, e) > threshold)
}

/// A query that survived validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Text as the generator emitted it, trimmed
    pub text: String,

    /// Identity for the executed set and the result cache
    pub canonical: String,
}

/// Per-step validation policy
#[derive(Debug, Clone)]
pub struct QueryFilter {
    pub max_per_step: usize,
    pub threshold: f64,
    pub min_len: usize,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            max_per_step: 3,
            threshold: REDUNDANCY_THRESHOLD,
            min_len: MIN_QUERY_LEN,
        }
    }
}

impl QueryFilter {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_per_step: config.max_queries_per_step,
            threshold: config.redundancy_threshold,
            min_len: config.min_query_len,
        }
    }

    /// Keep at most `max_per_step` candidates, in emission order, that are
    /// long enough and not redundant against `executed` or each other
    pub fn select(&self, candidates: &[String], executed: &HashSet<String>) -> Vec<ValidatedQuery> {
        let mut accepted: Vec<ValidatedQuery> = Vec::new();

        for candidate in candidates {
            if accepted.len() == self.max_per_step {
                debug!(cap = self.max_per_step, "Per-step query cap reached, discarding the rest");
                break;
            }

            let Some(canonical) = canonicalize_with(candidate, self.min_len) else {
                debug!(query = %candidate, "Dropping query below minimum length");
                continue;
            };

            let seen = executed
                .iter()
                .map(String::as_str)
                .chain(accepted.iter().map(|q| q.canonical.as_str()));
            if is_redundant(&canonical, seen, self.threshold) {
                debug!(query = %canonical, "Dropping redundant query");
                continue;
            }

            accepted.push(ValidatedQuery {
                text: candidate.trim().to_string(),
                canonical,
            });
        }

        accepted
    }
}
