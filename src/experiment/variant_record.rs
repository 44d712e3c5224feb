//! Variant Record - one content alternative within an experiment

use serde::{Deserialize, Serialize};

/// Variant Record represents one content alternative.
///
/// The `changes` field is an opaque change-set (the content delta applied
/// for this variant, e.g. a replacement headline or image). The engine never
/// interprets it; it is carried through to the published snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    variant_id: String,
    experiment_id: String,
    is_control: bool,
    weight: f64,
    #[serde(default = "empty_changes")]
    changes: serde_json::Value,
}

fn empty_changes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Variant {
    /// Create a non-control variant with an empty change-set.
    ///
    /// # Arguments
    ///
    /// * `variant_id` - Unique identifier for the variant
    /// * `experiment_id` - ID of the parent experiment
    /// * `weight` - Traffic weight in percent (0-100)
    #[must_use]
    pub fn new(variant_id: impl Into<String>, experiment_id: impl Into<String>, weight: f64) -> Self {
        VariantBuilder::new(variant_id, experiment_id)
            .weight(weight)
            .build()
    }

    /// Create the control variant with an empty change-set.
    #[must_use]
    pub fn control(
        variant_id: impl Into<String>,
        experiment_id: impl Into<String>,
        weight: f64,
    ) -> Self {
        VariantBuilder::new(variant_id, experiment_id)
            .control(true)
            .weight(weight)
            .build()
    }

    /// Create a builder for a variant with a change-set.
    #[must_use]
    pub fn builder(
        variant_id: impl Into<String>,
        experiment_id: impl Into<String>,
    ) -> VariantBuilder {
        VariantBuilder::new(variant_id, experiment_id)
    }

    /// Get the variant ID.
    #[must_use]
    pub fn variant_id(&self) -> &str {
        &self.variant_id
    }

    /// Get the parent experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Whether this is the control variant.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.is_control
    }

    /// Traffic weight in percent.
    #[must_use]
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Opaque content change-set.
    #[must_use]
    pub const fn changes(&self) -> &serde_json::Value {
        &self.changes
    }

    pub(crate) fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }
}

/// Builder for `Variant`.
#[derive(Debug)]
pub struct VariantBuilder {
    variant_id: String,
    experiment_id: String,
    is_control: bool,
    weight: f64,
    changes: serde_json::Value,
}

impl VariantBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(variant_id: impl Into<String>, experiment_id: impl Into<String>) -> Self {
        Self {
            variant_id: variant_id.into(),
            experiment_id: experiment_id.into(),
            is_control: false,
            weight: 0.0,
            changes: empty_changes(),
        }
    }

    /// Mark the variant as control.
    #[must_use]
    pub const fn control(mut self, is_control: bool) -> Self {
        self.is_control = is_control;
        self
    }

    /// Set the traffic weight in percent.
    #[must_use]
    pub const fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the content change-set.
    #[must_use]
    pub fn changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = changes;
        self
    }

    /// Build the `Variant`.
    #[must_use]
    pub fn build(self) -> Variant {
        Variant {
            variant_id: self.variant_id,
            experiment_id: self.experiment_id,
            is_control: self.is_control,
            weight: self.weight,
            changes: self.changes,
        }
    }
}
