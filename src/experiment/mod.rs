//! Experiment data model
//!
//! ## Schema Overview
//!
//! ```text
//! Experiment (1) ──< Variant (N)      [weights sum to 100, exactly one control]
//!      │
//!      └──< EventRecord (N)           [append-only: view | click | conversion]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use pagesplit::experiment::{
//!     DistributionMode, EventKind, EventRecord, Experiment, ExperimentStatus, Variant,
//! };
//!
//! let mut experiment = Experiment::builder("exp-001", "Headline test", "article-42")
//!     .distribution_mode(DistributionMode::AutoPilot)
//!     .confidence_level(0.95)
//!     .build();
//!
//! let control = Variant::control("a", experiment.experiment_id(), 50.0);
//! let treatment = Variant::new("b", experiment.experiment_id(), 50.0);
//!
//! experiment.transition_to(ExperimentStatus::Running).unwrap();
//!
//! let view = EventRecord::new("exp-001", "b", "session-1", EventKind::View);
//! # let _ = (control, treatment, view);
//! ```

mod event_record;
mod experiment_record;
mod variant_record;

pub use event_record::{EventKind, EventMetadata, EventRecord, EventRecordBuilder};
pub use experiment_record::{
    DistributionMode, Experiment, ExperimentBuilder, ExperimentStatus, OptimizationGoal,
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_MIN_SAMPLE_SIZE,
};
pub use variant_record::{Variant, VariantBuilder};
