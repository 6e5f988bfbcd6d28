//! Context Builder - bounded summary of earlier reasoning steps
//!
//! Provides:
//! - Recency window (the last few steps always qualify)
//! - Importance filter for older steps
//! - Token budget management

use crate::llm::estimate_tokens;
use crate::types::ReasoningStep;
use deepforge_common::config::ResearchConfig;

/// Context builder configuration
#[derive(Debug, Clone)]
pub struct ContextBuilderConfig {
    /// Soft token budget for the whole summary
    pub max_tokens: usize,

    /// Trailing steps that always qualify
    pub recent_steps: usize,

    /// Older steps need a result above this confidence
    pub importance_threshold: f64,

    /// Result summaries shown per step
    pub summaries_per_step: usize,

    /// Characters kept from each summary
    pub summary_chars: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            recent_steps: 3,
            importance_threshold: 0.7,
            summaries_per_step: 2,
            summary_chars: 200,
        }
    }
}

impl ContextBuilderConfig {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_tokens: config.context_token_budget,
            ..Self::default()
        }
    }
}

pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    /// Render the selected steps in chronological order
    pub fn build(&self, history: &[ReasoningStep]) -> String {
        let recent_from = history.len().saturating_sub(self.config.recent_steps);

        let mut picked: Vec<String> = Vec::new();
        let mut tokens = 0;

        // Newest first so the budget cuts off the oldest material
        for (index, step) in history.iter().enumerate().rev() {
            let qualifies =
                index >= recent_from || step.has_confident_result(self.config.importance_threshold);
            if !qualifies {
                continue;
            }

            let rendered = self.render_step(step);
            let cost = estimate_tokens(&rendered);
            if !picked.is_empty() && tokens + cost > self.config.max_tokens {
                break;
            }
            tokens += cost;
            picked.push(rendered);
        }

        picked.reverse();
        picked.join("\n\n")
    }

    fn render_step(&self, step: &ReasoningStep) -> String {
        let mut out = format!("Step {}: {}", step.step_id, step.reasoning_text.trim());
        for result in step.results.iter().take(self.config.summaries_per_step) {
            out.push_str("\n- ");
            out.push_str(&result.query);
            out.push_str(": ");
            out.push_str(&truncate(&result.summary, self.config.summary_chars));
        }
        out
    }
}

/// First `max_chars` characters, with an ellipsis when cut
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
