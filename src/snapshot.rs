//! Published snapshot documents
//!
//! A [`ContentSnapshot`] holds everything the rendering layer needs to
//! assign and render variants for one content unit, with no call back into
//! the registry:
//!
//! ```json
//! {
//!   "content_unit": "article-42",
//!   "version": "9f2c…",
//!   "generated_at": "2026-03-01T12:00:00Z",
//!   "experiments": [
//!     {
//!       "experiment_id": "exp-1",
//!       "status": "running",
//!       "variants": [
//!         { "variant_id": "a", "weight": 38.75, "is_control": true,  "changes": {} },
//!         { "variant_id": "b", "weight": 61.25, "is_control": false, "changes": { "headline": "…" } }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! `version` is the SHA-256 of the serialized `experiments` list. It only
//! changes when something a consumer can observe changes, so it doubles as
//! a cache-busting marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::assignment::{self, WeightedVariant};
use crate::experiment::ExperimentStatus;
use crate::registry::ExperimentView;
use crate::{Error, Result};

/// One variant as published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotVariant {
    /// Variant id
    pub variant_id: String,
    /// Traffic weight in percent
    pub weight: f64,
    /// Whether this is the control
    pub is_control: bool,
    /// Content delta applied for this variant
    #[serde(default)]
    pub changes: serde_json::Value,
}

impl WeightedVariant for SnapshotVariant {
    fn variant_id(&self) -> &str {
        &self.variant_id
    }

    fn weight(&self) -> f64 {
        self.weight
    }

    fn is_control(&self) -> bool {
        self.is_control
    }
}

/// One experiment as published, variants in resolver order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSnapshot {
    /// Experiment id
    pub experiment_id: String,
    /// Status at publication time
    pub status: ExperimentStatus,
    /// Variants, control first
    pub variants: Vec<SnapshotVariant>,
}

impl ExperimentSnapshot {
    pub(crate) fn from_view(view: &ExperimentView) -> Self {
        Self {
            experiment_id: view.experiment().experiment_id().to_string(),
            status: view.experiment().status(),
            variants: view
                .variants()
                .iter()
                .map(|v| SnapshotVariant {
                    variant_id: v.variant_id().to_string(),
                    weight: v.weight(),
                    is_control: v.is_control(),
                    changes: v.changes().clone(),
                })
                .collect(),
        }
    }

    /// Variant a session sees under this experiment's status.
    ///
    /// - `running`: weighted hash assignment
    /// - `paused`: control
    /// - `completed`: the surviving (highest-weight) variant
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfiguration` for malformed weights, a missing
    /// control or a `draft` entry.
    pub fn assign(&self, session_key: &str) -> Result<&SnapshotVariant> {
        match self.status {
            ExperimentStatus::Running => {
                assignment::assign(&self.experiment_id, &self.variants, session_key)
            }
            ExperimentStatus::Paused => self.variants.iter().find(|v| v.is_control).ok_or_else(|| {
                Error::InvalidConfiguration(format!(
                    "experiment '{}' has no control variant",
                    self.experiment_id
                ))
            }),
            ExperimentStatus::Completed => assignment::walk_order(&self.variants)
                .reduce(|best, v| if v.weight > best.weight { v } else { best })
                .ok_or_else(|| {
                    Error::InvalidConfiguration(format!(
                        "experiment '{}' has no variants",
                        self.experiment_id
                    ))
                }),
            ExperimentStatus::Draft => Err(Error::InvalidConfiguration(format!(
                "experiment '{}' is not published",
                self.experiment_id
            ))),
        }
    }
}

/// Snapshot artifact for one content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSnapshot {
    /// Content unit key
    pub content_unit: String,
    /// Content hash of `experiments` (hex SHA-256)
    pub version: String,
    /// Generation time
    pub generated_at: DateTime<Utc>,
    /// Published experiments, sorted by id
    pub experiments: Vec<ExperimentSnapshot>,
}

impl ContentSnapshot {
    /// Build the snapshot for a content unit from registry views.
    ///
    /// Draft experiments are not published. Returns `Ok(None)` when nothing
    /// is left to publish, meaning the artifact should be removed.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the experiment list cannot be hashed.
    pub fn build(content_unit: &str, views: &[ExperimentView]) -> Result<Option<Self>> {
        let mut experiments: Vec<ExperimentSnapshot> = views
            .iter()
            .filter(|v| v.experiment().content_unit() == content_unit)
            .filter(|v| v.experiment().status() != ExperimentStatus::Draft)
            .map(ExperimentSnapshot::from_view)
            .collect();
        if experiments.is_empty() {
            return Ok(None);
        }
        experiments.sort_by(|a, b| a.experiment_id.cmp(&b.experiment_id));

        let version = hex::encode(Sha256::digest(serde_json::to_vec(&experiments)?));
        Ok(Some(Self {
            content_unit: content_unit.to_string(),
            version,
            generated_at: Utc::now(),
            experiments,
        }))
    }

    /// Published experiment by id.
    #[must_use]
    pub fn experiment(&self, experiment_id: &str) -> Option<&ExperimentSnapshot> {
        self.experiments
            .iter()
            .find(|e| e.experiment_id == experiment_id)
    }

    /// Resolve a session against the published document.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not in the snapshot
    /// - see [`ExperimentSnapshot::assign`]
    pub fn assign(&self, experiment_id: &str, session_key: &str) -> Result<&SnapshotVariant> {
        self.experiment(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?
            .assign(session_key)
    }

    /// Serialize to the artifact body.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` on failure.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse an artifact body.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if the body is not a snapshot document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
