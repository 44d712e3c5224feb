//! Artifact store for published snapshots
//!
//! Snapshot documents are stored as opaque bytes under a key per content
//! unit. Every write replaces the whole value; there is no partial-field
//! merge, so concurrent writers to one key race safely (last writer wins).
//!
//! The delivery target (object storage, CDN origin, edge KV) is an external
//! collaborator; [`MemoryKvStore`] is the in-process backend.
//!
//! # Example
//!
//! ```rust
//! use pagesplit::kv::{KvStore, MemoryKvStore};
//!
//! # async fn example() -> pagesplit::Result<()> {
//! let store = MemoryKvStore::new();
//!
//! store.put("snapshots/article-1.json", b"{}".to_vec()).await?;
//! assert!(store.exists("snapshots/article-1.json").await?);
//! assert_eq!(store.keys("snapshots/").await?, vec!["snapshots/article-1.json"]);
//!
//! store.delete("snapshots/article-1.json").await?;
//! assert_eq!(store.get("snapshots/article-1.json").await?, None);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryKvStore;

use crate::Result;
use std::future::Future;

/// Whole-value key-value store.
pub trait KvStore: Send + Sync {
    /// Get a value by key.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Store a value, replacing any previous value in full.
    fn put(&self, key: &str, value: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete a key.
    ///
    /// No-op if the key doesn't exist.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check if a key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.get(key).await?.is_some()) }
    }

    /// Keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;
}
