//! Append-only event log backends.
//!
//! Durable storage belongs to an external collaborator; the in-memory log
//! keeps events for the lifetime of the process.

use std::future::Future;

use dashmap::DashMap;

use crate::experiment::EventRecord;
use crate::Result;

/// Append-only event log.
///
/// Records are never updated in place. Implementations must not hold a
/// lock across an await point.
pub trait EventLog: Send + Sync {
    /// Append an event.
    fn append(&self, event: EventRecord) -> impl Future<Output = Result<()>> + Send;

    /// All events of an experiment in append order.
    fn events_for(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Vec<EventRecord>>> + Send;

    /// Drop all events of a deleted experiment.
    ///
    /// No-op if the experiment has no events.
    fn purge(&self, experiment_id: &str) -> impl Future<Output = Result<()>> + Send;
}

/// In-memory event log, partitioned by experiment.
///
/// # Example
///
/// ```rust
/// use pagesplit::aggregator::{EventLog, MemoryEventLog};
/// use pagesplit::experiment::{EventKind, EventRecord};
///
/// # async fn example() -> pagesplit::Result<()> {
/// let log = MemoryEventLog::new();
/// log.append(EventRecord::new("exp-1", "a", "s-1", EventKind::View)).await?;
/// assert_eq!(log.events_for("exp-1").await?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    partitions: DashMap<String, Vec<EventRecord>>,
}

impl MemoryEventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Check if the log holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventLog for MemoryEventLog {
    async fn append(&self, event: EventRecord) -> Result<()> {
        self.partitions
            .entry(event.experiment_id().to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn events_for(&self, experiment_id: &str) -> Result<Vec<EventRecord>> {
        Ok(self
            .partitions
            .get(experiment_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    async fn purge(&self, experiment_id: &str) -> Result<()> {
        self.partitions.remove(experiment_id);
        Ok(())
    }
}
