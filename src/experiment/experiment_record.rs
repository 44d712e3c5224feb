//! Experiment Record - root entity of a content experiment

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of an experiment.
///
/// ```text
/// draft ──> running ──> completed
///             │  ^          ^
///             v  │          │
///            paused ────────┘
/// ```
///
/// Deletion is out of band and terminal; it is handled by the registry,
/// not represented as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    /// Defined but not yet serving traffic.
    Draft,
    /// Serving traffic and collecting events.
    Running,
    /// Temporarily halted; may resume.
    Paused,
    /// Finished; terminal except for deletion.
    Completed,
}

impl ExperimentStatus {
    /// Status name as used in documents and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Transitions only move forward, except the `running -> paused -> running` loop.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Draft | Self::Paused, Self::Running)
                | (Self::Running, Self::Paused)
                | (Self::Running | Self::Paused, Self::Completed)
        )
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owns the traffic weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionMode {
    /// Weights are set by an operator.
    #[default]
    Manual,
    /// Weights are set by the traffic optimizer.
    AutoPilot,
}

/// Metric the optimizer maximises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    /// `conversions / impressions`
    #[default]
    ConversionRate,
    /// `clicks / impressions`
    ClickRate,
}

impl OptimizationGoal {
    /// Goal name as used in documents and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConversionRate => "conversion_rate",
            Self::ClickRate => "click_rate",
        }
    }
}

/// Default minimum number of impressions per variant before optimizing.
pub const DEFAULT_MIN_SAMPLE_SIZE: u64 = 100;

/// Default confidence level for the significance test.
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Experiment Record represents a content experiment on one content unit.
///
/// The `content_unit` is the page/article the experiment runs on; snapshots
/// are published per content unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    experiment_id: String,
    name: String,
    content_unit: String,
    status: ExperimentStatus,
    distribution_mode: DistributionMode,
    optimization_goal: OptimizationGoal,
    min_sample_size: u64,
    confidence_level: f64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl Experiment {
    /// Create a new draft experiment with default policy.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Unique identifier for the experiment
    /// * `name` - Human-readable name
    /// * `content_unit` - Key of the page/article the experiment runs on
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        content_unit: impl Into<String>,
    ) -> Self {
        ExperimentBuilder::new(experiment_id, name, content_unit).build()
    }

    /// Create a builder for an experiment with a non-default policy.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        content_unit: impl Into<String>,
    ) -> ExperimentBuilder {
        ExperimentBuilder::new(experiment_id, name, content_unit)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the content unit key.
    #[must_use]
    pub fn content_unit(&self) -> &str {
        &self.content_unit
    }

    /// Get the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Get the distribution mode.
    #[must_use]
    pub const fn distribution_mode(&self) -> DistributionMode {
        self.distribution_mode
    }

    /// Get the optimization goal.
    #[must_use]
    pub const fn optimization_goal(&self) -> OptimizationGoal {
        self.optimization_goal
    }

    /// Minimum impressions every variant needs before the optimizer acts.
    #[must_use]
    pub const fn min_sample_size(&self) -> u64 {
        self.min_sample_size
    }

    /// Confidence level for the significance test, expected in (0, 1).
    #[must_use]
    pub const fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Timestamp of the first transition into `running`.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Timestamp of the transition into `completed`.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Whether the optimizer is allowed to change weights right now.
    #[must_use]
    pub fn is_auto_pilot_running(&self) -> bool {
        self.status == ExperimentStatus::Running
            && self.distribution_mode == DistributionMode::AutoPilot
    }

    /// Move to `next`, stamping start/end dates.
    ///
    /// `started_at` is set only on the first entry into `running`;
    /// `ended_at` only on entry into `completed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the state machine forbids the move.
    pub fn transition_to(&mut self, next: ExperimentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        match next {
            ExperimentStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            ExperimentStatus::Completed => self.ended_at = Some(now),
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Switch between manual and auto-pilot distribution.
    pub fn set_distribution_mode(&mut self, mode: DistributionMode) {
        self.distribution_mode = mode;
    }
}

/// Builder for `Experiment`.
#[derive(Debug)]
pub struct ExperimentBuilder {
    experiment_id: String,
    name: String,
    content_unit: String,
    distribution_mode: DistributionMode,
    optimization_goal: OptimizationGoal,
    min_sample_size: u64,
    confidence_level: f64,
    created_at: DateTime<Utc>,
}

impl ExperimentBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
        content_unit: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            content_unit: content_unit.into(),
            distribution_mode: DistributionMode::default(),
            optimization_goal: OptimizationGoal::default(),
            min_sample_size: DEFAULT_MIN_SAMPLE_SIZE,
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            created_at: Utc::now(),
        }
    }

    /// Set the distribution mode.
    #[must_use]
    pub const fn distribution_mode(mut self, mode: DistributionMode) -> Self {
        self.distribution_mode = mode;
        self
    }

    /// Set the optimization goal.
    #[must_use]
    pub const fn optimization_goal(mut self, goal: OptimizationGoal) -> Self {
        self.optimization_goal = goal;
        self
    }

    /// Set the minimum sample size per variant.
    #[must_use]
    pub const fn min_sample_size(mut self, min_sample_size: u64) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }

    /// Set the confidence level.
    #[must_use]
    pub const fn confidence_level(mut self, confidence_level: f64) -> Self {
        self.confidence_level = confidence_level;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `Experiment` in `draft` status.
    #[must_use]
    pub fn build(self) -> Experiment {
        Experiment {
            experiment_id: self.experiment_id,
            name: self.name,
            content_unit: self.content_unit,
            status: ExperimentStatus::Draft,
            distribution_mode: self.distribution_mode,
            optimization_goal: self.optimization_goal,
            min_sample_size: self.min_sample_size,
            confidence_level: self.confidence_level,
            created_at: self.created_at,
            started_at: None,
            ended_at: None,
        }
    }
}
