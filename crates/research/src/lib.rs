//! DeepForge Research Engine
//!
//! Iterative deep research over a knowledge base, the web and an optional
//! knowledge graph:
//! - Tag protocol between the generator and the engine
//! - Query canonicalization and near-duplicate filtering
//! - Parallel multi-source retrieval with per-source fallback
//! - Streamed reasoning, search and extraction events

pub mod backends;
pub mod cache;
pub mod context;
pub mod event;
pub mod extractor;
pub mod llm;
pub mod merger;
pub mod orchestrator;
pub mod prompts;
pub mod query;
pub mod retrieval;
pub mod session;
pub mod tags;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use event::{EventStatus, ResearchEvent};
pub use orchestrator::DeepResearcher;
pub use retrieval::RetrievalGateway;
pub use session::{Session, SessionMetrics};
pub use tags::TagSet;
