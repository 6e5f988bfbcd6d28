//! Prompt templates
//!
//! Templates use `{name}` placeholders, filled in a single pass so that
//! substituted text is never scanned for further placeholders.
//! Callers may swap any template through `DeepResearcher::with_prompts`.

use crate::tags::TagSet;

const REASONING_SYSTEM: &str = r#"You are a research assistant that answers questions by reasoning step by step and searching for evidence.

Whenever you need more information, write a search query between {begin_query} and {end_query}. The system will search the knowledge base and the web, then reply with the findings between {begin_result} and {end_result}.

Rules:
- Issue at most {max_queries} queries per turn, each on a single line.
- Do not repeat a query you have already issued.
- Reason about the findings before asking for more.
- When you have enough evidence, stop searching and continue your reasoning without emitting search tags.

Example:
Question: "Why is the sky blue?"
I should check how sunlight scatters in the atmosphere.
{begin_query}rayleigh scattering atmosphere{end_query}
"#;

const EXTRACTION_SYSTEM: &str = r#"You extract the information relevant to a search query from retrieved documents.
Use only facts stated in the documents. Be concise and factual. Keep numbers, names and dates exact.
If the documents contain nothing relevant to the query, reply exactly: "No helpful information found.""#;

const EXTRACTION_USER: &str = r#"Previous reasoning steps:
{prev_context}

Current search query:
{query}

Searched documents:
{document}

Write the relevant information for the current search query."#;

const REASONING_FALLBACK: &str =
    "I was unable to continue reasoning because the language model did not respond. I will answer with the information gathered so far.";

#[derive(Debug, Clone)]
pub struct Prompts {
    /// Reasoning system prompt with `{begin_query}`, `{end_query}`,
    /// `{begin_result}`, `{end_result}` and `{max_queries}` placeholders
    pub reasoning_system: String,

    pub extraction_system: String,

    /// Extraction turn with `{prev_context}`, `{query}` and `{document}`
    pub extraction_user: String,

    /// Substituted when the reasoning call fails before any output
    pub reasoning_fallback: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            reasoning_system: REASONING_SYSTEM.to_string(),
            extraction_system: EXTRACTION_SYSTEM.to_string(),
            extraction_user: EXTRACTION_USER.to_string(),
            reasoning_fallback: REASONING_FALLBACK.to_string(),
        }
    }
}

/// Substitute `{name}` placeholders; unknown braces are kept verbatim
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let hit = values
            .iter()
            .find(|(name, _)| tail.starts_with(name) && tail[name.len()..].starts_with('}'));
        match hit {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

impl Prompts {
    pub fn reasoning(&self, tags: &TagSet, max_queries: usize) -> String {
        let max_queries = max_queries.to_string();
        fill(
            &self.reasoning_system,
            &[
                ("begin_query", tags.begin_query.as_str()),
                ("end_query", tags.end_query.as_str()),
                ("begin_result", tags.begin_result.as_str()),
                ("end_result", tags.end_result.as_str()),
                ("max_queries", max_queries.as_str()),
            ],
        )
    }

    pub fn extraction(&self, prev_context: &str, query: &str, document: &str) -> String {
        let prev_context = if prev_context.trim().is_empty() { "(none)" } else { prev_context };
        fill(
            &self.extraction_user,
            &[("prev_context", prev_context), ("query", query), ("document", document)],
        )
    }
}
