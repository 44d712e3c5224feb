//! Event Aggregator - concurrent per-variant impression/click/conversion counts
//!
//! Counters are owned by the aggregator, grouped per experiment and keyed by
//! variant inside it. Each bucket is a set of atomics: increments on one
//! bucket are linearizable, and different buckets never contend beyond the
//! map shard lookup.
//!
//! ## De-duplication
//!
//! - `view`: counted once per session per experiment. The first-view check
//!   is an atomic set insert, so two concurrent views from one session count
//!   exactly once.
//! - `click` / `conversion`: counted on every occurrence. The first one per
//!   session and variant also counts towards the goal sessions the
//!   significance test uses.
//!
//! Every accepted event is appended to the [`EventLog`] before counting, so
//! the counters can always be recomputed from the log.
//!
//! Recording holds the rebuild lock shared from the registry check to the
//! increment. [`EventAggregator::restore`] and [`EventAggregator::purge`]
//! hold it exclusively, so no event is counted into a tally that is being
//! replaced or dropped.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pagesplit::aggregator::{EventAggregator, EventRequest, MemoryEventLog};
//! use pagesplit::experiment::{Experiment, Variant};
//! use pagesplit::registry::VariantRegistry;
//!
//! # async fn example() -> pagesplit::Result<()> {
//! let registry = Arc::new(VariantRegistry::new());
//! registry.create(
//!     Experiment::new("exp-1", "Headline", "article-1"),
//!     vec![Variant::control("a", "exp-1", 50.0), Variant::new("b", "exp-1", 50.0)],
//! )?;
//!
//! let aggregator = EventAggregator::new(Arc::clone(&registry), MemoryEventLog::new());
//! aggregator.record(EventRequest::new("exp-1", "b", "session-1", "view")).await?;
//! aggregator.record(EventRequest::new("exp-1", "b", "session-1", "view")).await?;
//!
//! assert_eq!(aggregator.variant_counters("exp-1", "b").impressions, 1);
//! # Ok(())
//! # }
//! ```

mod counters;
mod event_log;

pub use counters::VariantCounters;
pub use event_log::{EventLog, MemoryEventLog};

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use counters::ExperimentTally;

use crate::experiment::{EventKind, EventMetadata, EventRecord};
use crate::registry::VariantRegistry;
use crate::{Error, Result};

/// Inbound tracking request, as received at the intake boundary.
///
/// `kind` is kept as a string so unknown kinds surface as
/// `Error::InvalidKind` instead of a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    /// Experiment id
    pub experiment_id: String,
    /// Variant id the session was shown
    pub variant_id: String,
    /// Anonymous session key
    pub session_key: String,
    /// `view`, `click` or `conversion`
    pub kind: String,
    /// Conversion type or click target
    #[serde(default)]
    pub subtype: Option<String>,
    /// Request context
    #[serde(default)]
    pub metadata: Option<EventMetadata>,
}

impl EventRequest {
    /// Create a request without subtype or metadata.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        variant_id: impl Into<String>,
        session_key: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            variant_id: variant_id.into(),
            session_key: session_key.into(),
            kind: kind.into(),
            subtype: None,
            metadata: None,
        }
    }

    /// Set the subtype.
    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Set the request context.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Parse into an immutable event record.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKind` for an unrecognized kind.
    pub fn into_record(self) -> Result<EventRecord> {
        let kind: EventKind = self.kind.parse()?;
        Ok(EventRecord::builder(
            self.experiment_id,
            self.variant_id,
            self.session_key,
            kind,
        )
        .subtype(self.subtype)
        .metadata(self.metadata.unwrap_or_default())
        .build())
    }
}

/// What happened to an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Logged and counted.
    Counted,
    /// Logged; not counted because the session already viewed the experiment.
    DuplicateView,
}

/// Concurrent aggregator of tracking events.
pub struct EventAggregator<L: EventLog = MemoryEventLog> {
    registry: Arc<VariantRegistry>,
    log: L,
    tallies: DashMap<String, Arc<ExperimentTally>>,
    // shared while recording, exclusive while a tally is rebuilt or purged
    rebuild: RwLock<()>,
}

impl<L: EventLog> EventAggregator<L> {
    /// Create an aggregator validating events against `registry`.
    #[must_use]
    pub fn new(registry: Arc<VariantRegistry>, log: L) -> Self {
        Self {
            registry,
            log,
            tallies: DashMap::new(),
            rebuild: RwLock::new(()),
        }
    }

    /// The underlying event log.
    #[must_use]
    pub const fn log(&self) -> &L {
        &self.log
    }

    /// Validate, log and count a tracking request.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidKind` for an unrecognized event kind
    /// - `Error::UnknownExperiment` / `Error::UnknownVariant` if the variant
    ///   does not belong to the experiment
    /// - `Error::ExperimentDeleted` if the experiment was deleted while the
    ///   event was being logged; it is not counted
    /// - any error from the event log; nothing is counted in that case
    pub async fn record(&self, request: EventRequest) -> Result<Recorded> {
        let event = request.into_record()?;
        self.record_event(event).await
    }

    /// Log and count an already-parsed event.
    ///
    /// # Errors
    ///
    /// Same as [`EventAggregator::record`], minus kind parsing.
    pub async fn record_event(&self, event: EventRecord) -> Result<Recorded> {
        let _recording = self.rebuild.read().await;
        let experiment_id = event.experiment_id();
        let generation = self
            .registry
            .variant_generation(experiment_id, event.variant_id())?;

        // The shared rebuild guard is the only lock held across this await.
        self.log.append(event.clone()).await?;

        // A delete, and possibly a re-create under the same id, can land
        // during the append. The purge that follows the delete waits for
        // this guard and then drops the logged event.
        let current = self
            .registry
            .variant_generation(experiment_id, event.variant_id())
            .ok();
        if current != Some(generation) {
            debug!(
                experiment_id,
                variant_id = event.variant_id(),
                "experiment deleted while recording, event not counted"
            );
            return Err(Error::ExperimentDeleted(experiment_id.to_string()));
        }

        Ok(self.count(&event))
    }

    /// Counters of one variant (zeros if it has no events yet).
    #[must_use]
    pub fn variant_counters(&self, experiment_id: &str, variant_id: &str) -> VariantCounters {
        self.tallies
            .get(experiment_id)
            .map(|tally| tally.variant(variant_id))
            .unwrap_or_default()
    }

    /// Counters of every variant of an experiment, in resolver order.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn experiment_counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>> {
        let view = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?;
        Ok(view
            .variants()
            .iter()
            .map(|v| {
                (
                    v.variant_id().to_string(),
                    self.variant_counters(experiment_id, v.variant_id()),
                )
            })
            .collect())
    }

    /// Count events that are already in durable storage without re-logging.
    ///
    /// Intended for a freshly started aggregator restoring its counters;
    /// replaying onto live counters double counts clicks and conversions.
    /// Events for unknown experiments or variants are skipped.
    ///
    /// Returns the number of events counted (duplicate views excluded).
    pub fn replay<'a>(&self, events: impl IntoIterator<Item = &'a EventRecord>) -> usize {
        let mut counted = 0;
        for event in events {
            if self
                .registry
                .check_variant(event.experiment_id(), event.variant_id())
                .is_err()
            {
                debug!(
                    experiment_id = event.experiment_id(),
                    variant_id = event.variant_id(),
                    "skipping replayed event for unknown variant"
                );
                continue;
            }
            if self.count(event) == Recorded::Counted {
                counted += 1;
            }
        }
        counted
    }

    /// Recompute an experiment's counters from the event log.
    ///
    /// The counters are rebuilt into a fresh tally that replaces the live one
    /// in a single step, so restoring twice gives the same result. Recording
    /// waits until the replacement is in place.
    ///
    /// # Errors
    ///
    /// Returns any error from the event log; the live counters are kept.
    pub async fn restore(&self, experiment_id: &str) -> Result<usize> {
        let _rebuilding = self.rebuild.write().await;
        let events = self.log.events_for(experiment_id).await?;

        let tally = ExperimentTally::default();
        let mut counted = 0;
        for event in &events {
            if self
                .registry
                .check_variant(event.experiment_id(), event.variant_id())
                .is_ok()
                && tally.count(event)
            {
                counted += 1;
            }
        }
        self.tallies
            .insert(experiment_id.to_string(), Arc::new(tally));

        info!(experiment_id, events = events.len(), counted, "counters restored from event log");
        Ok(counted)
    }

    /// Drop counters, de-dup state and logged events of a deleted experiment.
    ///
    /// # Errors
    ///
    /// Returns any error from the event log.
    pub async fn purge(&self, experiment_id: &str) -> Result<()> {
        let _rebuilding = self.rebuild.write().await;
        self.tallies.remove(experiment_id);
        self.log.purge(experiment_id).await?;
        info!(experiment_id, "aggregates purged");
        Ok(())
    }

    fn count(&self, event: &EventRecord) -> Recorded {
        // Clone the Arc so the map shard is not held while counting.
        let tally = Arc::clone(
            self.tallies
                .entry(event.experiment_id().to_string())
                .or_default()
                .value(),
        );
        if tally.count(event) {
            Recorded::Counted
        } else {
            Recorded::DuplicateView
        }
    }
}
