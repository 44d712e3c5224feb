//! Snapshot Publisher - one artifact per content unit
//!
//! `publish(unit)` rebuilds the unit's [`ContentSnapshot`] from the registry
//! and replaces the stored artifact wholesale; when nothing publishable is
//! left (every experiment deleted or still in draft) it removes the artifact
//! instead of leaving it stale. `publish` is idempotent for an unchanged
//! registry state, so retrying is always safe.
//!
//! Publications for one content unit are serialized: the registry read and
//! the artifact write happen under a per-unit async lock, so the artifact
//! never regresses to an older registry state. Different units publish in
//! parallel.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::kv::{KvStore, MemoryKvStore};
use crate::registry::{RegistryChange, VariantRegistry};
use crate::snapshot::ContentSnapshot;
use crate::{Error, Result};

/// Where a publication left the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// Artifact written.
    Published {
        /// Artifact key
        key: String,
        /// Snapshot version marker
        version: String,
    },
    /// Nothing left to publish; artifact removed.
    Removed {
        /// Artifact key
        key: String,
    },
}

impl Publication {
    /// Artifact key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Published { key, .. } | Self::Removed { key } => key,
        }
    }
}

/// Publishes registry state to a [`KvStore`].
pub struct SnapshotPublisher<S: KvStore = MemoryKvStore> {
    registry: Arc<VariantRegistry>,
    store: S,
    key_prefix: String,
    max_attempts: u32,
    retry_backoff: Duration,
    unit_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: KvStore> SnapshotPublisher<S> {
    /// Create a publisher reading from `registry` and writing to `store`.
    #[must_use]
    pub fn new(registry: Arc<VariantRegistry>, store: S, config: &PublisherConfig) -> Self {
        Self {
            registry,
            store,
            key_prefix: config.key_prefix.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            unit_locks: DashMap::new(),
        }
    }

    /// The artifact store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Artifact key of a content unit.
    #[must_use]
    pub fn artifact_key(&self, content_unit: &str) -> String {
        format!("{}{content_unit}.json", self.key_prefix)
    }

    /// Rebuild and store the snapshot of a content unit.
    ///
    /// # Errors
    ///
    /// Returns `Error::PublicationFailed` once every attempt failed. The
    /// registry stays authoritative; calling `publish` again is safe.
    pub async fn publish(&self, content_unit: &str) -> Result<Publication> {
        let lock = self.unit_lock(content_unit);
        let _guard = lock.lock().await;

        let key = self.artifact_key(content_unit);
        let views = self.registry.experiments_for_unit(content_unit);
        let Some(snapshot) = ContentSnapshot::build(content_unit, &views)? else {
            self.with_retry(content_unit, || self.store.delete(&key))
                .await?;
            self.release_unit(content_unit, &lock);
            info!(content_unit, key = %key, "snapshot removed; no published experiments left");
            return Ok(Publication::Removed { key });
        };

        let body = snapshot.to_bytes()?;
        self.with_retry(content_unit, || self.store.put(&key, body.clone()))
            .await?;
        info!(
            content_unit,
            key = %key,
            version = %snapshot.version,
            experiments = snapshot.experiments.len(),
            "snapshot published"
        );
        Ok(Publication::Published {
            key,
            version: snapshot.version,
        })
    }

    /// Remove a content unit's artifact regardless of registry state.
    ///
    /// # Errors
    ///
    /// Returns `Error::PublicationFailed` once every attempt failed.
    pub async fn retract(&self, content_unit: &str) -> Result<()> {
        let lock = self.unit_lock(content_unit);
        let _guard = lock.lock().await;

        let key = self.artifact_key(content_unit);
        self.with_retry(content_unit, || self.store.delete(&key))
            .await?;
        self.release_unit(content_unit, &lock);
        info!(content_unit, key = %key, "snapshot retracted");
        Ok(())
    }

    /// React to a registry change by republishing the affected unit.
    ///
    /// # Errors
    ///
    /// Same as [`SnapshotPublisher::publish`].
    pub async fn handle(&self, change: &RegistryChange) -> Result<Publication> {
        debug!(
            experiment_id = change.experiment_id(),
            content_unit = change.content_unit(),
            "registry change received"
        );
        self.publish(change.content_unit()).await
    }

    /// Republish every content unit known to the registry.
    ///
    /// # Errors
    ///
    /// Returns the first publication failure.
    pub async fn publish_all(&self) -> Result<Vec<Publication>> {
        let mut publications = Vec::new();
        for unit in self.registry.content_units() {
            publications.push(self.publish(&unit).await?);
        }
        Ok(publications)
    }

    /// Read back the stored snapshot of a content unit.
    ///
    /// # Errors
    ///
    /// Returns store errors or `Error::Serialization` for a corrupt artifact.
    pub async fn fetch(&self, content_unit: &str) -> Result<Option<ContentSnapshot>> {
        self.store
            .get(&self.artifact_key(content_unit))
            .await?
            .map(|bytes| ContentSnapshot::from_bytes(&bytes))
            .transpose()
    }

    fn unit_lock(&self, content_unit: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.unit_locks
                .entry(content_unit.to_string())
                .or_default()
                .value(),
        )
    }

    // Forget the lock of a unit without an artifact. Kept while another
    // caller holds a clone, so queued writers still serialize on it.
    fn release_unit(&self, content_unit: &str, held: &Arc<Mutex<()>>) {
        self.unit_locks.remove_if(content_unit, |_, lock| {
            Arc::ptr_eq(lock, held) && Arc::strong_count(lock) == 2
        });
    }

    async fn with_retry<F, Fut>(&self, content_unit: &str, mut op: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.max_attempts => {
                    warn!(content_unit, attempt, error = %e, "artifact write failed; retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(content_unit, attempt, error = %e, "artifact write failed; giving up");
                    return Err(Error::PublicationFailed {
                        content_unit: content_unit.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
