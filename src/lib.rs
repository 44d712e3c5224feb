//! # pagesplit: Content Experiment Engine
//!
//! Runs controlled content experiments (headline, image and layout
//! variants) on published pages and, in auto-pilot mode, shifts traffic
//! towards the better-performing variant as evidence accumulates.
//!
//! ## Components
//!
//! - **Variant Registry** ([`registry`]): experiment definitions, weights,
//!   validation, per-experiment serialized writes
//! - **Assignment Resolver** ([`assignment`]): deterministic
//!   session-to-variant bucketing
//! - **Event Aggregator** ([`aggregator`]): lock-free per-variant counters
//!   with first-view de-duplication
//! - **Traffic Optimizer** ([`optimizer`]): two-proportion z-test and
//!   bounded-step reallocation
//! - **Snapshot Publisher** ([`publisher`]): immutable per-content-unit
//!   artifacts for render-time assignment
//!
//! ## Example Usage
//!
//! ```rust
//! use pagesplit::experiment::{DistributionMode, Experiment, Variant};
//! use pagesplit::aggregator::EventRequest;
//! use pagesplit::Engine;
//!
//! # async fn example() -> pagesplit::Result<()> {
//! let engine = Engine::builder().build()?;
//!
//! engine
//!     .create_experiment(
//!         Experiment::builder("exp-1", "Headline test", "article-42")
//!             .distribution_mode(DistributionMode::AutoPilot)
//!             .build(),
//!         vec![
//!             Variant::control("a", "exp-1", 50.0),
//!             Variant::new("b", "exp-1", 50.0),
//!         ],
//!     )
//!     .await?;
//! engine.start("exp-1").await?;
//!
//! let variant = engine.assign("exp-1", "session-1")?;
//! engine
//!     .record_event(EventRequest::new("exp-1", variant.as_str(), "session-1", "view"))
//!     .await?;
//!
//! // The published document is enough to assign without the engine.
//! let snapshot = engine.snapshot("article-42").await?.expect("published");
//! assert_eq!(snapshot.assign("exp-1", "session-1")?.variant_id, variant);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod aggregator;
pub mod assignment;
pub mod config;
pub mod error;
pub mod experiment;
pub mod intake;
pub mod kv;
pub mod logging;
pub mod optimizer;
pub mod publisher;
pub mod registry;
pub mod snapshot;
pub mod storage;

pub use error::{Error, Result};

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use aggregator::{
    EventAggregator, EventLog, EventRequest, MemoryEventLog, Recorded, VariantCounters,
};
use config::EngineConfig;
use experiment::{DistributionMode, Experiment, ExperimentStatus, Variant};
use intake::EventIntake;
use kv::{KvStore, MemoryKvStore};
use optimizer::scheduler::SchedulerHandle;
use optimizer::{BoundedStepPolicy, OptimizationOutcome, TrafficOptimizer, VariantReport};
use publisher::{Publication, SnapshotPublisher};
use registry::{ExperimentView, RegistryChange, VariantRegistry};
use snapshot::{ContentSnapshot, ExperimentSnapshot};
use storage::EventStore;

/// Engine instance wiring registry, aggregator, optimizer and publisher.
///
/// Every mutating operation that affects a content unit republishes its
/// snapshot before returning.
pub struct Engine<S: KvStore = MemoryKvStore, L: EventLog = MemoryEventLog> {
    config: EngineConfig,
    registry: Arc<VariantRegistry>,
    aggregator: Arc<EventAggregator<L>>,
    optimizer: TrafficOptimizer,
    publisher: SnapshotPublisher<S>,
}

impl Engine {
    /// Create a new engine builder with in-memory backends.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }
}

impl<S: KvStore, L: EventLog> Engine<S, L> {
    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared variant registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<VariantRegistry> {
        &self.registry
    }

    /// Shared event aggregator.
    #[must_use]
    pub const fn aggregator(&self) -> &Arc<EventAggregator<L>> {
        &self.aggregator
    }

    /// Snapshot publisher.
    #[must_use]
    pub const fn publisher(&self) -> &SnapshotPublisher<S> {
        &self.publisher
    }

    /// Subscribe to registry changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.registry.subscribe()
    }

    /// Intake boundary recording into this engine's aggregator.
    #[must_use]
    pub fn intake(&self) -> EventIntake<L> {
        EventIntake::new(Arc::clone(&self.aggregator))
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Register an experiment (in `draft`) with its variants.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation`, `Error::DuplicateExperiment`, or
    /// `Error::PublicationFailed`.
    pub async fn create_experiment(
        &self,
        experiment: Experiment,
        variants: Vec<Variant>,
    ) -> Result<Publication> {
        let change = self.registry.create(experiment, variants)?;
        self.publisher.handle(&change).await
    }

    /// `draft -> running`. Publishes the experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the experiment is a draft.
    pub async fn start(&self, experiment_id: &str) -> Result<Publication> {
        let change = self.registry.transition_from(
            experiment_id,
            ExperimentStatus::Draft,
            ExperimentStatus::Running,
        )?;
        self.publisher.handle(&change).await
    }

    /// `running -> paused`. Published paused experiments serve control.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the experiment is running.
    pub async fn pause(&self, experiment_id: &str) -> Result<Publication> {
        self.transition(experiment_id, ExperimentStatus::Paused).await
    }

    /// `paused -> running`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` unless the experiment is paused.
    pub async fn resume(&self, experiment_id: &str) -> Result<Publication> {
        let change = self.registry.transition_from(
            experiment_id,
            ExperimentStatus::Paused,
            ExperimentStatus::Running,
        )?;
        self.publisher.handle(&change).await
    }

    /// `running | paused -> completed`. The artifact is kept and serves the
    /// surviving variant until deletion.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` from `draft` or `completed`.
    pub async fn complete(&self, experiment_id: &str) -> Result<Publication> {
        self.transition(experiment_id, ExperimentStatus::Completed).await
    }

    /// Delete an experiment: registry entry, counters and events.
    ///
    /// Its entry leaves the content unit's snapshot; if it was the last
    /// published experiment of the unit, the artifact is removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment`, event-log errors, or
    /// `Error::PublicationFailed`.
    pub async fn delete(&self, experiment_id: &str) -> Result<Publication> {
        let change = self.registry.delete(experiment_id)?;
        let published = self.publisher.handle(&change).await;
        self.aggregator.purge(experiment_id).await?;
        published
    }

    /// Manual weight edit (all-or-nothing).
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an invalid vector, otherwise as
    /// [`VariantRegistry::apply_weights`] and [`SnapshotPublisher::publish`].
    pub async fn set_weights(
        &self,
        experiment_id: &str,
        weights: &[(String, f64)],
    ) -> Result<Publication> {
        let change = self.registry.apply_weights(experiment_id, weights)?;
        self.publisher.handle(&change).await
    }

    /// Switch between manual and auto-pilot distribution.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn set_distribution_mode(&self, experiment_id: &str, mode: DistributionMode) -> Result<()> {
        self.registry.set_distribution_mode(experiment_id, mode)
    }

    /// Current state of an experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn experiment(&self, experiment_id: &str) -> Result<ExperimentView> {
        self.registry
            .get(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Assignment and events
    // ------------------------------------------------------------------

    /// Variant a session sees right now, from live registry state.
    ///
    /// Same rules as the published snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment`, or `Error::InvalidConfiguration`
    /// for a draft or malformed experiment.
    pub fn assign(&self, experiment_id: &str, session_key: &str) -> Result<String> {
        let view = self.experiment(experiment_id)?;
        let entry = ExperimentSnapshot::from_view(&view);
        Ok(entry.assign(session_key)?.variant_id.clone())
    }

    /// Record a tracking event.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKind`, `Error::UnknownExperiment`,
    /// `Error::UnknownVariant`, `Error::ExperimentDeleted` for a delete that
    /// raced the event, or event-log errors.
    pub async fn record_event(&self, request: EventRequest) -> Result<Recorded> {
        self.aggregator.record(request).await
    }

    /// Aggregate counters of every variant, in resolver order.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn counters(&self, experiment_id: &str) -> Result<Vec<(String, VariantCounters)>> {
        self.aggregator.experiment_counters(experiment_id)
    }

    // ------------------------------------------------------------------
    // Optimization
    // ------------------------------------------------------------------

    /// Run one optimization pass; republish on rebalance.
    ///
    /// A publication failure after a committed rebalance is logged, not
    /// returned: the registry already holds the new weights and the next
    /// publish of the unit carries them.
    ///
    /// # Errors
    ///
    /// See [`TrafficOptimizer::optimize`].
    pub async fn optimize(&self, experiment_id: &str) -> Result<OptimizationOutcome> {
        let outcome = self.optimizer.optimize(experiment_id, &self.aggregator)?;
        if let OptimizationOutcome::Rebalanced { content_unit, .. } = &outcome {
            if let Err(e) = self.publisher.publish(content_unit).await {
                warn!(
                    experiment_id,
                    content_unit = %content_unit,
                    error = %e,
                    "publish after rebalance failed"
                );
            }
        }
        Ok(outcome)
    }

    /// Per-variant statistics against control.
    ///
    /// # Errors
    ///
    /// See [`TrafficOptimizer::report`].
    pub fn report(&self, experiment_id: &str) -> Result<Vec<VariantReport>> {
        self.optimizer.report(experiment_id, &self.aggregator)
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Republish a content unit.
    ///
    /// # Errors
    ///
    /// Returns `Error::PublicationFailed` once every attempt failed.
    pub async fn publish(&self, content_unit: &str) -> Result<Publication> {
        self.publisher.publish(content_unit).await
    }

    /// Published snapshot of a content unit.
    ///
    /// # Errors
    ///
    /// Returns store or deserialization errors.
    pub async fn snapshot(&self, content_unit: &str) -> Result<Option<ContentSnapshot>> {
        self.publisher.fetch(content_unit).await
    }

    // ------------------------------------------------------------------
    // Event log
    // ------------------------------------------------------------------

    /// Write an experiment's event log to a Parquet file.
    ///
    /// Returns the number of events written.
    ///
    /// # Errors
    ///
    /// Returns event-log, Arrow, Parquet or I/O errors.
    pub async fn export_events<P: AsRef<Path>>(
        &self,
        experiment_id: &str,
        path: P,
    ) -> Result<usize> {
        let events = self.aggregator.log().events_for(experiment_id).await?;
        EventStore::from_events(&events)?.write_parquet(path)?;
        info!(experiment_id, events = events.len(), "event log exported");
        Ok(events.len())
    }

    /// Load events from a Parquet file into the log and counters.
    ///
    /// Events for experiments or variants that are not registered are
    /// skipped. Returns the number of events imported.
    ///
    /// # Errors
    ///
    /// Returns Parquet/decoding errors or event-log errors.
    pub async fn import_events<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let events = EventStore::load_parquet(path)?.events()?;
        let mut imported = 0;
        for event in events {
            match self.aggregator.record_event(event).await {
                Ok(_) => imported += 1,
                Err(
                    Error::UnknownExperiment(_)
                    | Error::UnknownVariant { .. }
                    | Error::ExperimentDeleted(_),
                ) => {}
                Err(e) => return Err(e),
            }
        }
        info!(imported, "event log imported");
        Ok(imported)
    }

    /// Recompute an experiment's counters from the event log.
    ///
    /// # Errors
    ///
    /// Returns event-log errors.
    pub async fn restore(&self, experiment_id: &str) -> Result<usize> {
        self.aggregator.restore(experiment_id).await
    }

    async fn transition(&self, experiment_id: &str, next: ExperimentStatus) -> Result<Publication> {
        let change = self.registry.transition(experiment_id, next)?;
        self.publisher.handle(&change).await
    }
}

impl<S: KvStore + 'static, L: EventLog + 'static> Engine<S, L> {
    /// Start the recurring optimizer every `optimizer.interval_secs`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn_scheduler(self: Arc<Self>) -> SchedulerHandle {
        let period = self.config.optimizer.interval();
        optimizer::scheduler::spawn(self, period)
    }
}

/// Engine builder
pub struct EngineBuilder<S: KvStore = MemoryKvStore, L: EventLog = MemoryEventLog> {
    config: EngineConfig,
    store: S,
    log: L,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            store: MemoryKvStore::new(),
            log: MemoryEventLog::new(),
        }
    }
}

impl<S: KvStore, L: EventLog> EngineBuilder<S, L> {
    /// Set the configuration
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the artifact store snapshots are published to
    #[must_use]
    pub fn store<T: KvStore>(self, store: T) -> EngineBuilder<T, L> {
        EngineBuilder {
            config: self.config,
            store,
            log: self.log,
        }
    }

    /// Set the append-only event log
    #[must_use]
    pub fn event_log<T: EventLog>(self, log: T) -> EngineBuilder<S, T> {
        EngineBuilder {
            config: self.config,
            store: self.store,
            log,
        }
    }

    /// Build the engine
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` if the configuration is invalid
    pub fn build(self) -> Result<Engine<S, L>> {
        self.config.validate()?;

        let registry = Arc::new(VariantRegistry::new());
        let aggregator = Arc::new(EventAggregator::new(Arc::clone(&registry), self.log));
        let policy = BoundedStepPolicy::new(
            self.config.optimizer.max_step_fraction,
            self.config.optimizer.floor_weight,
        );
        let optimizer = TrafficOptimizer::new(Arc::clone(&registry), policy);
        let publisher =
            SnapshotPublisher::new(Arc::clone(&registry), self.store, &self.config.publisher);

        Ok(Engine {
            config: self.config,
            registry,
            aggregator,
            optimizer,
            publisher,
        })
    }
}
