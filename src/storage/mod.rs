//! Persistence layer.
//!
//! The engine and API depend only on the narrow `KvStore` contract
//! (`get`/`set`/`exists`/`delete` over string keys holding JSON). Two
//! backends are provided: an in-memory map and a SQLite table via sqlx.

pub mod sqlite;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::types::RoundRecord;

pub use sqlite::SqliteStore;

/// Minimal key/value store contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Shared handle used across tasks.
pub type SharedStore = Arc<dyn KvStore>;

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local store. Contents are lost on restart.
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
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Open the backend named in config.
pub async fn open(cfg: &StorageConfig) -> Result<SharedStore> {
    match cfg.backend.as_str() {
        "memory" => {
            info!("Using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
        "sqlite" => {
            let store = SqliteStore::connect(&cfg.url, cfg.max_connections).await?;
            info!(url = %cfg.url, "Using SQLite store");
            Ok(Arc::new(store))
        }
        other => anyhow::bail!("Unknown storage backend: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Round archive
// ---------------------------------------------------------------------------

pub fn round_key(round_id: &Uuid) -> String {
    format!("round:{round_id}")
}

pub fn game_key(game_id: &str) -> String {
    format!("game:{game_id}")
}

/// Persist a settled round.
pub async fn archive_round(store: &dyn KvStore, record: &RoundRecord) -> Result<()> {
    let key = round_key(&record.round_id);
    let json = serde_json::to_string(record).context("Failed to serialise round record")?;
    store
        .set(&key, &json)
        .await
        .with_context(|| format!("Failed to archive round {}", record.round_id))?;
    debug!(key, bets = record.bets.len(), "Round archived");
    Ok(())
}

/// Load an archived round. `None` if it was never archived.
pub async fn load_round(store: &dyn KvStore, round_id: &Uuid) -> Result<Option<RoundRecord>> {
    let key = round_key(round_id);
    let Some(json) = store.get(&key).await? else {
        return Ok(None);
    };
    let record = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse round record {key}"))?;
    Ok(Some(record))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
