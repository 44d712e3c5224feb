//! Error types for pagesplit
//!
//! Every component returns typed results. Expected "not yet" outcomes of an
//! optimization pass are modelled as `OptimizationOutcome` variants, not here.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Rejections produced by variant/weight validation.
///
/// Validation always runs before any write, so a `ValidationError` never
/// leaves partially applied state behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Fewer than two variants supplied
    #[error("experiment needs at least 2 variants, got {0}")]
    TooFewVariants(usize),

    /// Weights do not add up to 100 within tolerance
    #[error("variant weights must sum to 100 (±0.01), got {0}")]
    WeightSum(f64),

    /// Not exactly one control variant
    #[error("experiment needs exactly one control variant, got {0}")]
    ControlCount(usize),

    /// A weight is negative, above 100 or not finite
    #[error("weight for variant '{variant_id}' must be within [0, 100], got {weight}")]
    WeightOutOfRange {
        /// Offending variant
        variant_id: String,
        /// Offending weight
        weight: f64,
    },

    /// The same variant id appears twice
    #[error("duplicate variant id '{0}'")]
    DuplicateVariant(String),

    /// A variant references another experiment, or a weight names an unknown variant
    #[error("variant '{variant_id}' does not belong to experiment '{experiment_id}'")]
    ForeignVariant {
        /// Experiment being validated
        experiment_id: String,
        /// Variant that does not belong to it
        variant_id: String,
    },

    /// A weight update omits one of the experiment's variants
    #[error("weight update is missing variant '{0}'")]
    MissingWeight(String),
}

/// pagesplit error types
#[derive(Error, Debug)]
pub enum Error {
    /// Experiment or weight vector failed validation
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No experiment with this id is registered
    #[error("Unknown experiment: {0}")]
    UnknownExperiment(String),

    /// An experiment with this id already exists
    #[error("Experiment already exists: {0}")]
    DuplicateExperiment(String),

    /// Event references a variant that is not part of the experiment
    #[error("Unknown variant '{variant_id}' for experiment '{experiment_id}'")]
    UnknownVariant {
        /// Experiment named by the event
        experiment_id: String,
        /// Variant named by the event
        variant_id: String,
    },

    /// Event kind is not one of view, click, conversion
    #[error("Invalid event kind: '{0}' (expected view, click or conversion)")]
    InvalidKind(String),

    /// Experiment policy cannot be evaluated (confidence level, variant set)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Lifecycle transition not allowed by the status state machine
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Experiment was deleted while an operation on it was in flight
    #[error("Experiment deleted during operation: {0}")]
    ExperimentDeleted(String),

    /// Artifact or event log backend failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Snapshot could not be written after all retry attempts
    #[error("Snapshot publication failed for content unit '{content_unit}': {reason}")]
    PublicationFailed {
        /// Content unit whose artifact was being written
        content_unit: String,
        /// Last underlying failure
        reason: String,
    },

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}
