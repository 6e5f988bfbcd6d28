//! Tag Codec - delimiters of the reasoning protocol
//!
//! The generator marks search queries and the engine marks retrieved
//! evidence with begin/end literals. Spans never nest; when the model nests
//! them anyway only the outermost pair counts.

use deepforge_common::config::TagConfig;
use std::ops::Range;

/// The four delimiter literals, injected at construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    pub begin_query: String,
    pub end_query: String,
    pub begin_result: String,
    pub end_result: String,
}

impl Default for TagSet {
    fn default() -> Self {
        Self::from_config(&TagConfig::default())
    }
}

impl TagSet {
    pub fn from_config(config: &TagConfig) -> Self {
        Self {
            begin_query: config.begin_query.clone(),
            end_query: config.end_query.clone(),
            begin_result: config.begin_result.clone(),
            end_result: config.end_result.clone(),
        }
    }

    /// Queries emitted by the generator, in order
    pub fn extract_queries(&self, text: &str) -> Vec<String> {
        extract_between(text, &self.begin_query, &self.end_query)
    }

    pub fn strip_queries(&self, text: &str) -> String {
        strip(text, &self.begin_query, &self.end_query)
    }

    pub fn strip_results(&self, text: &str) -> String {
        strip(text, &self.begin_result, &self.end_result)
    }

    /// Wrap evidence in result delimiters
    pub fn wrap_result(&self, body: &str) -> String {
        format!("{}{}{}", self.begin_result, body, self.end_result)
    }
}

/// Outer and inner byte ranges of one begin/end pair
struct Span {
    outer: Range<usize>,
    inner: Range<usize>,
    nested: bool,
}

/// Locate every outermost begin/end pair
///
/// A begin that is never closed is skipped when the scan runs out of end
/// tags, so it cannot swallow a well-formed pair that follows it.
fn spans(text: &str, begin: &str, end: &str) -> Vec<Span> {
    let mut found = Vec::new();
    if begin.is_empty() || end.is_empty() {
        return found;
    }

    let mut pos = 0;
    while let Some(offset) = text[pos..].find(begin) {
        let start = pos + offset;
        let inner_start = start + begin.len();
        let mut cursor = inner_start;
        let mut depth = 1usize;
        let mut nested = false;

        let closed = loop {
            let next_end = match text[cursor..].find(end) {
                Some(i) => cursor + i,
                None => break None,
            };
            match text[cursor..].find(begin).map(|i| cursor + i) {
                Some(next_begin) if next_begin < next_end => {
                    depth += 1;
                    nested = true;
                    cursor = next_begin + begin.len();
                }
                _ => {
                    depth -= 1;
                    cursor = next_end + end.len();
                    if depth == 0 {
                        break Some(next_end);
                    }
                }
            }
        };

        match closed {
            Some(inner_end) => {
                found.push(Span {
                    outer: start..cursor,
                    inner: inner_start..inner_end,
                    nested,
                });
                pos = cursor;
            }
            None if nested => pos = inner_start,
            None => break,
        }
    }

    found
}

/// Every non-empty substring strictly between a begin/end pair, in order
pub fn extract_between(text: &str, begin: &str, end: &str) -> Vec<String> {
    spans(text, begin, end)
        .into_iter()
        .filter_map(|span| {
            let inner = &text[span.inner];
            let content = if span.nested {
                inner.replace(begin, "").replace(end, "")
            } else {
                inner.to_string()
            };
            let content = content.trim();
            (!content.is_empty()).then(|| content.to_string())
        })
        .collect()
}

/// Remove every begin…end span including the delimiters
pub fn strip(text: &str, begin: &str, end: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for span in spans(text, begin, end) {
        out.push_str(&text[last..span.outer.start]);
        last = span.outer.end;
    }
    out.push_str(&text[last..]);
    out
}
