//! DeepForge Common Library
//!
//! Shared code for the DeepForge research engine including:
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - Embedding client abstraction
//! - Cross-session caching

pub mod cache;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
