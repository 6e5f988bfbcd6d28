//! Cross-session key/value cache
//!
//! Provides:
//! - A `CacheStore` seam with JSON get/set helpers
//! - An in-process store for single-node runs and tests
//! - A Redis-backed store with TTL and key prefixing

use crate::config::CacheConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Raw string store; values are JSON documents
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;

    async fn set_raw(&self, key: &str, value: String) -> Result<()>;
}

/// Get a JSON value from any store
pub async fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Result<Option<T>> {
    match store.get_raw(key).await? {
        Some(json) => {
            let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                message: format!("Failed to parse cached value: {}", e),
            })?;
            debug!(key = %key, "Cache hit");
            Ok(Some(parsed))
        }
        None => {
            debug!(key = %key, "Cache miss");
            Ok(None)
        }
    }
}

/// Set a JSON value in any store
pub async fn set_json<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
        message: format!("Failed to serialize value: {}", e),
    })?;
    store.set_raw(key, json).await
}

/// In-process store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Redis-backed store
pub struct RedisStore {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
    ttl_secs: u64,
}

impl RedisStore {
    /// Connect to Redis
    pub async fn connect(url: &str, key_prefix: &str, ttl_secs: u64) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
            ttl_secs,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, &value, self.ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = self.ttl_secs, "Cache set");
        Ok(())
    }
}

/// Open the configured store, falling back to memory when Redis is unset or unreachable
pub async fn open_store(config: &CacheConfig) -> Arc<dyn CacheStore> {
    if let Some(url) = config.redis_url.as_deref() {
        match RedisStore::connect(url, &config.key_prefix, config.ttl_secs).await {
            Ok(store) => return Arc::new(store),
            Err(e) => warn!(error = %e, "Failed to connect to Redis, using in-process cache"),
        }
    }
    Arc::new(MemoryStore::new())
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Hex SHA-256 of a text, used to keep keys short
    pub fn text_hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Build an embedding cache key
    pub fn embedding(text: &str, model: &str) -> String {
        format!("embedding:{}:{}", model, text_hash(text))
    }
}
