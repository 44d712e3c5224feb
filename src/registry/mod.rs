//! Variant Registry - experiment definitions and their traffic weights
//!
//! Each experiment is an independent unit of concurrency: its definition,
//! variants and weight version live behind a per-experiment mutex, so
//! read-modify-write cycles for one experiment are serialized while
//! different experiments proceed in parallel. There is no lock spanning
//! experiments.
//!
//! Every successful mutation returns a [`RegistryChange`] and broadcasts it
//! to subscribers (the snapshot publisher and any external observers).
//!
//! # Example
//!
//! ```rust
//! use pagesplit::experiment::{Experiment, ExperimentStatus, Variant};
//! use pagesplit::registry::VariantRegistry;
//!
//! # fn main() -> pagesplit::Result<()> {
//! let registry = VariantRegistry::new();
//! let experiment = Experiment::new("exp-1", "Headline test", "article-42");
//! registry.create(
//!     experiment,
//!     vec![
//!         Variant::control("a", "exp-1", 50.0),
//!         Variant::new("b", "exp-1", 50.0),
//!     ],
//! )?;
//!
//! registry.transition("exp-1", ExperimentStatus::Running)?;
//! registry.apply_weights("exp-1", &[("a".into(), 30.0), ("b".into(), 70.0)])?;
//! // One status change plus one weight change.
//! assert_eq!(registry.get("exp-1").unwrap().version(), 2);
//! # Ok(())
//! # }
//! ```

mod validation;

pub use validation::{check_sum, check_weight, validate, MAX_WEIGHT, WEIGHT_TOLERANCE};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::experiment::{DistributionMode, Experiment, ExperimentStatus, Variant};
use crate::{Error, Result};

/// Capacity of the change feed before slow subscribers start lagging.
const CHANGE_FEED_CAPACITY: usize = 1024;

/// Notification emitted after a successful registry mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryChange {
    /// Experiment registered.
    Created {
        /// Experiment id
        experiment_id: String,
        /// Content unit the experiment runs on
        content_unit: String,
    },
    /// Lifecycle status changed.
    StatusChanged {
        /// Experiment id
        experiment_id: String,
        /// Content unit the experiment runs on
        content_unit: String,
        /// Previous status
        from: ExperimentStatus,
        /// New status
        to: ExperimentStatus,
    },
    /// Weight vector replaced.
    WeightsChanged {
        /// Experiment id
        experiment_id: String,
        /// Content unit the experiment runs on
        content_unit: String,
        /// Entry revision after the change
        version: u64,
    },
    /// Experiment removed (terminal).
    Deleted {
        /// Experiment id
        experiment_id: String,
        /// Content unit the experiment ran on
        content_unit: String,
    },
}

impl RegistryChange {
    /// Experiment the change applies to.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        match self {
            Self::Created { experiment_id, .. }
            | Self::StatusChanged { experiment_id, .. }
            | Self::WeightsChanged { experiment_id, .. }
            | Self::Deleted { experiment_id, .. } => experiment_id,
        }
    }

    /// Content unit whose snapshot is affected.
    #[must_use]
    pub fn content_unit(&self) -> &str {
        match self {
            Self::Created { content_unit, .. }
            | Self::StatusChanged { content_unit, .. }
            | Self::WeightsChanged { content_unit, .. }
            | Self::Deleted { content_unit, .. } => content_unit,
        }
    }
}

/// Point-in-time copy of one experiment's registry entry.
///
/// Variants are ordered control first, then in registration order. This is
/// the order the assignment resolver walks.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentView {
    experiment: Experiment,
    variants: Vec<Variant>,
    version: u64,
}

impl ExperimentView {
    /// The experiment definition.
    #[must_use]
    pub const fn experiment(&self) -> &Experiment {
        &self.experiment
    }

    /// Variants in resolver order.
    #[must_use]
    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    /// Entry revision; bumped on every status, mode or weight change.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The control variant.
    #[must_use]
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control())
    }

    /// Current `(variant_id, weight)` pairs in resolver order.
    #[must_use]
    pub fn weights(&self) -> Vec<(String, f64)> {
        self.variants
            .iter()
            .map(|v| (v.variant_id().to_string(), v.weight()))
            .collect()
    }
}

struct EntryState {
    experiment: Experiment,
    variants: Vec<Variant>,
    version: u64,
    deleted: bool,
}

impl EntryState {
    fn view(&self) -> ExperimentView {
        ExperimentView {
            experiment: self.experiment.clone(),
            variants: self.variants.clone(),
            version: self.version,
        }
    }
}

struct RegistryEntry {
    // unique per `create`, so a re-created id is a different entry
    generation: u64,
    state: Mutex<EntryState>,
}

impl RegistryEntry {
    // Every critical section leaves the state consistent before it can
    // panic, so a poisoned lock still guards valid data.
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of experiments, their variants and traffic weights.
pub struct VariantRegistry {
    entries: DashMap<String, Arc<RegistryEntry>>,
    generations: AtomicU64,
    changes: broadcast::Sender<RegistryChange>,
}

impl VariantRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            entries: DashMap::new(),
            generations: AtomicU64::new(0),
            changes,
        }
    }

    /// Subscribe to the change feed.
    ///
    /// Only changes made after subscribing are delivered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.changes.subscribe()
    }

    /// Number of registered experiments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no experiments are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register an experiment with its variants.
    ///
    /// The variant set is validated before anything is stored. Variants are
    /// reordered control first; the relative order of the others is kept.
    ///
    /// # Errors
    ///
    /// - `Error::Validation` if the variant set is invalid
    /// - `Error::DuplicateExperiment` if the id is already registered
    pub fn create(&self, experiment: Experiment, variants: Vec<Variant>) -> Result<RegistryChange> {
        validate(&experiment, &variants)?;

        let (control, others): (Vec<_>, Vec<_>) =
            variants.into_iter().partition(Variant::is_control);
        let variants: Vec<Variant> = control.into_iter().chain(others).collect();

        let experiment_id = experiment.experiment_id().to_string();
        let content_unit = experiment.content_unit().to_string();

        match self.entries.entry(experiment_id.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateExperiment(experiment_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(RegistryEntry {
                    generation: self.generations.fetch_add(1, Ordering::Relaxed),
                    state: Mutex::new(EntryState {
                        experiment,
                        variants,
                        version: 0,
                        deleted: false,
                    }),
                }));
            }
        }

        info!(experiment_id = %experiment_id, content_unit = %content_unit, "experiment registered");
        Ok(self.emit(RegistryChange::Created {
            experiment_id,
            content_unit,
        }))
    }

    /// Copy of an experiment's current state.
    #[must_use]
    pub fn get(&self, experiment_id: &str) -> Option<ExperimentView> {
        let entry = self.entry(experiment_id).ok()?;
        let state = entry.lock();
        Some(state.view())
    }

    /// All experiment ids, sorted.
    #[must_use]
    pub fn experiment_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Experiments on a content unit, sorted by experiment id.
    #[must_use]
    pub fn experiments_for_unit(&self, content_unit: &str) -> Vec<ExperimentView> {
        let entries: Vec<Arc<RegistryEntry>> =
            self.entries.iter().map(|e| Arc::clone(e.value())).collect();

        let mut views: Vec<ExperimentView> = entries
            .iter()
            .filter_map(|entry| {
                let state = entry.lock();
                (!state.deleted && state.experiment.content_unit() == content_unit)
                    .then(|| state.view())
            })
            .collect();
        views.sort_by(|a, b| a.experiment.experiment_id().cmp(b.experiment.experiment_id()));
        views
    }

    /// All distinct content units, sorted.
    #[must_use]
    pub fn content_units(&self) -> Vec<String> {
        let entries: Vec<Arc<RegistryEntry>> =
            self.entries.iter().map(|e| Arc::clone(e.value())).collect();
        let units: FxHashSet<String> = entries
            .iter()
            .map(|entry| entry.lock().experiment.content_unit().to_string())
            .collect();
        let mut units: Vec<String> = units.into_iter().collect();
        units.sort();
        units
    }

    /// Ids of experiments that are running in auto-pilot mode, sorted.
    #[must_use]
    pub fn auto_pilot_running(&self) -> Vec<String> {
        let entries: Vec<(String, Arc<RegistryEntry>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        let mut ids: Vec<String> = entries
            .into_iter()
            .filter(|(_, entry)| entry.lock().experiment.is_auto_pilot_running())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Check that `variant_id` belongs to `experiment_id`.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::UnknownVariant` if the variant is not part of it
    pub fn check_variant(&self, experiment_id: &str, variant_id: &str) -> Result<()> {
        self.variant_generation(experiment_id, variant_id).map(|_| ())
    }

    /// Registration generation of the experiment `variant_id` belongs to.
    ///
    /// Each `create` gets a new generation, so an experiment deleted and
    /// registered again under the same id compares unequal.
    ///
    /// # Errors
    ///
    /// Same as [`VariantRegistry::check_variant`].
    pub fn variant_generation(&self, experiment_id: &str, variant_id: &str) -> Result<u64> {
        let entry = self.entry(experiment_id)?;
        let state = entry.lock();
        if state.deleted {
            return Err(Error::UnknownExperiment(experiment_id.to_string()));
        }
        if state.variants.iter().any(|v| v.variant_id() == variant_id) {
            Ok(entry.generation)
        } else {
            Err(Error::UnknownVariant {
                experiment_id: experiment_id.to_string(),
                variant_id: variant_id.to_string(),
            })
        }
    }

    /// Move an experiment to a new lifecycle status.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::InvalidTransition` if the state machine forbids the move
    pub fn transition(&self, experiment_id: &str, next: ExperimentStatus) -> Result<RegistryChange> {
        self.change_status(experiment_id, None, next)
    }

    /// Move an experiment to `next` only if it is currently in `from`.
    ///
    /// The check and the move happen under the same entry lock.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::InvalidTransition` if it is not in `from`, or the state
    ///   machine forbids the move
    pub fn transition_from(
        &self,
        experiment_id: &str,
        from: ExperimentStatus,
        next: ExperimentStatus,
    ) -> Result<RegistryChange> {
        self.change_status(experiment_id, Some(from), next)
    }

    fn change_status(
        &self,
        experiment_id: &str,
        expected: Option<ExperimentStatus>,
        next: ExperimentStatus,
    ) -> Result<RegistryChange> {
        let entry = self.entry(experiment_id)?;
        let change = {
            let mut state = entry.lock();
            if state.deleted {
                return Err(Error::UnknownExperiment(experiment_id.to_string()));
            }
            let from = state.experiment.status();
            if expected.is_some_and(|expected| expected != from) {
                return Err(Error::InvalidTransition {
                    from: from.to_string(),
                    to: next.to_string(),
                });
            }
            state.experiment.transition_to(next)?;
            state.version += 1;
            RegistryChange::StatusChanged {
                experiment_id: experiment_id.to_string(),
                content_unit: state.experiment.content_unit().to_string(),
                from,
                to: next,
            }
        };

        info!(experiment_id, status = %next, "experiment status changed");
        Ok(self.emit(change))
    }

    /// Switch an experiment between manual and auto-pilot distribution.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn set_distribution_mode(&self, experiment_id: &str, mode: DistributionMode) -> Result<()> {
        let entry = self.entry(experiment_id)?;
        {
            let mut state = entry.lock();
            if state.deleted {
                return Err(Error::UnknownExperiment(experiment_id.to_string()));
            }
            state.experiment.set_distribution_mode(mode);
            state.version += 1;
        }
        info!(experiment_id, ?mode, "distribution mode changed");
        Ok(())
    }

    /// Replace the weight vector of an experiment (all-or-nothing).
    ///
    /// `weights` must name every variant of the experiment exactly once and
    /// the resulting set must pass [`validate`]. Nothing is changed unless
    /// the whole update is valid.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::ExperimentDeleted` if it was deleted while waiting for the lock
    /// - `Error::Validation` if the update is partial or invalid
    pub fn apply_weights(
        &self,
        experiment_id: &str,
        weights: &[(String, f64)],
    ) -> Result<RegistryChange> {
        self.update_weights(experiment_id, None, weights)?
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))
    }

    /// Replace the weight vector only if the entry is still at `expected_version`.
    ///
    /// Returns `Ok(None)` without effect when another writer changed the
    /// entry (weights, status or mode) since the caller read it.
    ///
    /// # Errors
    ///
    /// Same as [`VariantRegistry::apply_weights`].
    pub fn apply_weights_if(
        &self,
        experiment_id: &str,
        expected_version: u64,
        weights: &[(String, f64)],
    ) -> Result<Option<RegistryChange>> {
        self.update_weights(experiment_id, Some(expected_version), weights)
    }

    /// Remove an experiment (terminal).
    ///
    /// In-flight writers holding the entry observe the deletion under the
    /// entry lock and abort.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownExperiment` if the experiment is not registered.
    pub fn delete(&self, experiment_id: &str) -> Result<RegistryChange> {
        let (_, entry) = self
            .entries
            .remove(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?;

        let content_unit = {
            let mut state = entry.lock();
            state.deleted = true;
            state.experiment.content_unit().to_string()
        };

        info!(experiment_id, content_unit = %content_unit, "experiment deleted");
        Ok(self.emit(RegistryChange::Deleted {
            experiment_id: experiment_id.to_string(),
            content_unit,
        }))
    }

    fn update_weights(
        &self,
        experiment_id: &str,
        expected_version: Option<u64>,
        weights: &[(String, f64)],
    ) -> Result<Option<RegistryChange>> {
        let entry = self.entry(experiment_id)?;
        self.update_entry(&entry, experiment_id, expected_version, weights)
    }

    // The entry may have been removed from the map since the caller fetched it.
    fn update_entry(
        &self,
        entry: &RegistryEntry,
        experiment_id: &str,
        expected_version: Option<u64>,
        weights: &[(String, f64)],
    ) -> Result<Option<RegistryChange>> {
        let change = {
            let mut state = entry.lock();
            if state.deleted {
                return Err(Error::ExperimentDeleted(experiment_id.to_string()));
            }
            if let Some(expected) = expected_version {
                if state.version != expected {
                    debug!(
                        experiment_id,
                        expected,
                        actual = state.version,
                        "weight update superseded"
                    );
                    return Ok(None);
                }
            }

            let candidate = reweighted(&state.experiment, &state.variants, weights)?;
            validate(&state.experiment, &candidate)?;

            state.variants = candidate;
            state.version += 1;
            RegistryChange::WeightsChanged {
                experiment_id: experiment_id.to_string(),
                content_unit: state.experiment.content_unit().to_string(),
                version: state.version,
            }
        };

        info!(experiment_id, ?weights, "variant weights applied");
        Ok(Some(self.emit(change)))
    }

    fn entry(&self, experiment_id: &str) -> Result<Arc<RegistryEntry>> {
        self.entries
            .get(experiment_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))
    }

    fn emit(&self, change: RegistryChange) -> RegistryChange {
        // No subscribers is not an error.
        let _ = self.changes.send(change.clone());
        change
    }
}

impl Default for VariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the candidate variant list for a weight update.
fn reweighted(
    experiment: &Experiment,
    current: &[Variant],
    weights: &[(String, f64)],
) -> std::result::Result<Vec<Variant>, ValidationError> {
    let mut seen = FxHashSet::default();
    for (variant_id, _) in weights {
        if !current.iter().any(|v| v.variant_id() == variant_id) {
            return Err(ValidationError::ForeignVariant {
                experiment_id: experiment.experiment_id().to_string(),
                variant_id: variant_id.clone(),
            });
        }
        if !seen.insert(variant_id.as_str()) {
            return Err(ValidationError::DuplicateVariant(variant_id.clone()));
        }
    }

    current
        .iter()
        .map(|variant| {
            let (_, weight) = weights
                .iter()
                .find(|(id, _)| id == variant.variant_id())
                .ok_or_else(|| ValidationError::MissingWeight(variant.variant_id().to_string()))?;
            let mut updated = variant.clone();
            updated.set_weight(*weight);
            Ok(updated)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(experiment_id: &str) -> VariantRegistry {
        let registry = VariantRegistry::new();
        registry
            .create(
                Experiment::new(experiment_id, "Headline", "article-1"),
                vec![
                    Variant::new("b", experiment_id, 50.0),
                    Variant::control("a", experiment_id, 50.0),
                ],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_create_orders_control_first() {
        let registry = registry_with("exp-1");
        let view = registry.get("exp-1").unwrap();
        assert_eq!(view.variants()[0].variant_id(), "a");
        assert_eq!(view.variants()[1].variant_id(), "b");
        assert_eq!(view.version(), 0);
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let registry = registry_with("exp-1");
        let err = registry
            .create(
                Experiment::new("exp-1", "Again", "article-1"),
                vec![
                    Variant::control("a", "exp-1", 50.0),
                    Variant::new("b", "exp-1", 50.0),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateExperiment(_)));
    }

    #[test]
    fn test_apply_weights_all_or_nothing() {
        let registry = registry_with("exp-1");

        let partial = registry.apply_weights("exp-1", &[("a".into(), 100.0)]);
        assert!(matches!(
            partial,
            Err(Error::Validation(ValidationError::MissingWeight(_)))
        ));

        let bad_sum = registry.apply_weights("exp-1", &[("a".into(), 60.0), ("b".into(), 60.0)]);
        assert!(matches!(
            bad_sum,
            Err(Error::Validation(ValidationError::WeightSum(_)))
        ));

        let view = registry.get("exp-1").unwrap();
        assert_eq!(
            view.weights(),
            vec![("a".to_string(), 50.0), ("b".to_string(), 50.0)]
        );
        assert_eq!(view.version(), 0);
    }

    #[test]
    fn test_apply_weights_foreign_variant() {
        let registry = registry_with("exp-1");
        let err = registry
            .apply_weights(
                "exp-1",
                &[("a".into(), 50.0), ("b".into(), 25.0), ("z".into(), 25.0)],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::ForeignVariant { .. })
        ));
    }

    #[test]
    fn test_apply_weights_if_superseded() {
        let registry = registry_with("exp-1");
        registry
            .apply_weights("exp-1", &[("a".into(), 40.0), ("b".into(), 60.0)])
            .unwrap();

        let stale = registry
            .apply_weights_if("exp-1", 0, &[("a".into(), 10.0), ("b".into(), 90.0)])
            .unwrap();
        assert!(stale.is_none());

        let fresh = registry
            .apply_weights_if("exp-1", 1, &[("a".into(), 10.0), ("b".into(), 90.0)])
            .unwrap();
        assert!(matches!(
            fresh,
            Some(RegistryChange::WeightsChanged { version: 2, .. })
        ));
    }

    #[test]
    fn test_status_change_bumps_revision() {
        let registry = registry_with("exp-1");
        registry.transition("exp-1", ExperimentStatus::Running).unwrap();
        assert_eq!(registry.get("exp-1").unwrap().version(), 1);

        // A read taken before the pause is stale afterwards.
        registry.transition("exp-1", ExperimentStatus::Paused).unwrap();
        let stale = registry
            .apply_weights_if("exp-1", 1, &[("a".into(), 10.0), ("b".into(), 90.0)])
            .unwrap();
        assert!(stale.is_none());
    }

    #[test]
    fn test_change_feed() {
        let registry = registry_with("exp-1");
        let mut feed = registry.subscribe();

        registry.transition("exp-1", ExperimentStatus::Running).unwrap();
        registry.delete("exp-1").unwrap();

        let first = feed.try_recv().unwrap();
        assert!(matches!(
            first,
            RegistryChange::StatusChanged {
                to: ExperimentStatus::Running,
                ..
            }
        ));
        let second = feed.try_recv().unwrap();
        assert_eq!(second.content_unit(), "article-1");
        assert!(matches!(second, RegistryChange::Deleted { .. }));
    }

    #[test]
    fn test_delete_then_apply_fails() {
        let registry = registry_with("exp-1");
        registry.delete("exp-1").unwrap();
        assert!(registry.get("exp-1").is_none());
        assert!(matches!(
            registry.apply_weights("exp-1", &[("a".into(), 50.0), ("b".into(), 50.0)]),
            Err(Error::UnknownExperiment(_))
        ));
        assert!(matches!(
            registry.delete("exp-1"),
            Err(Error::UnknownExperiment(_))
        ));
    }

    #[test]
    fn test_check_variant() {
        let registry = registry_with("exp-1");
        assert!(registry.check_variant("exp-1", "b").is_ok());
        assert!(matches!(
            registry.check_variant("exp-1", "z"),
            Err(Error::UnknownVariant { .. })
        ));
        assert!(matches!(
            registry.check_variant("exp-9", "a"),
            Err(Error::UnknownExperiment(_))
        ));
    }

    #[test]
    fn test_auto_pilot_running_filter() {
        let registry = registry_with("exp-1");
        assert!(registry.auto_pilot_running().is_empty());

        registry
            .set_distribution_mode("exp-1", DistributionMode::AutoPilot)
            .unwrap();
        registry.transition("exp-1", ExperimentStatus::Running).unwrap();
        assert_eq!(registry.auto_pilot_running(), vec!["exp-1".to_string()]);

        registry.transition("exp-1", ExperimentStatus::Paused).unwrap();
        assert!(registry.auto_pilot_running().is_empty());
    }

    #[test]
    fn test_writer_holding_entry_observes_delete() {
        let registry = registry_with("exp-1");
        let entry = registry.entry("exp-1").unwrap();
        let version = registry.get("exp-1").unwrap().version();
        registry.delete("exp-1").unwrap();

        let weights = [("a".to_string(), 30.0), ("b".to_string(), 70.0)];
        assert!(matches!(
            registry.update_entry(&entry, "exp-1", Some(version), &weights),
            Err(Error::ExperimentDeleted(_))
        ));
        assert!((entry.lock().variants[1].weight() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recreated_experiment_has_new_generation() {
        let registry = registry_with("exp-1");
        let first = registry.variant_generation("exp-1", "a").unwrap();
        assert_eq!(registry.variant_generation("exp-1", "b").unwrap(), first);

        registry.delete("exp-1").unwrap();
        assert!(registry.variant_generation("exp-1", "a").is_err());

        registry
            .create(
                Experiment::new("exp-1", "Headline", "article-1"),
                vec![
                    Variant::control("a", "exp-1", 50.0),
                    Variant::new("b", "exp-1", 50.0),
                ],
            )
            .unwrap();
        assert_ne!(registry.variant_generation("exp-1", "a").unwrap(), first);
    }

    #[test]
    fn test_transition_from_checks_current_status() {
        let registry = registry_with("exp-1");
        assert!(matches!(
            registry.transition_from("exp-1", ExperimentStatus::Paused, ExperimentStatus::Running),
            Err(Error::InvalidTransition { .. })
        ));
        assert_eq!(
            registry.get("exp-1").unwrap().experiment().status(),
            ExperimentStatus::Draft
        );

        registry
            .transition_from("exp-1", ExperimentStatus::Draft, ExperimentStatus::Running)
            .unwrap();
        registry.transition("exp-1", ExperimentStatus::Paused).unwrap();
        // A paused experiment is not a draft, even though the move itself is legal.
        assert!(matches!(
            registry.transition_from("exp-1", ExperimentStatus::Draft, ExperimentStatus::Running),
            Err(Error::InvalidTransition { .. })
        ));
        registry
            .transition_from("exp-1", ExperimentStatus::Paused, ExperimentStatus::Running)
            .unwrap();
    }
}
