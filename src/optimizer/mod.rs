//! Traffic Optimizer - statistical reallocation of variant weights
//!
//! One pass for one experiment:
//!
//! 1. Read the registry entry (status, mode, policy, weights, revision)
//! 2. Read aggregate counters for every variant
//! 3. Stop with `InsufficientData` if any variant is below `min_sample_size`
//! 4. Two-proportion z-test of each non-control variant against control,
//!    over sessions that reached the goal at least once
//! 5. Stop with `NoSignificantDifference` if nothing differs
//! 6. Ask the [`ReallocationPolicy`] for the next weights
//! 7. Commit with `apply_weights_if(revision)`
//!
//! Steps 3 to 6 run on owned copies; no registry or counter lock is held.
//! The final write is conditional on the revision read in step 1, so a
//! manual edit, pause or mode switch in the meantime turns the pass into
//! `Superseded`, and a deletion turns it into `Error::ExperimentDeleted`.
//! Only `Rebalanced` changes state.

mod policy;
pub mod scheduler;
mod significance;

pub use policy::{normalize, BoundedStepPolicy, ReallocationPolicy, VariantReport, Verdict};
pub use significance::{check_confidence, critical_z, two_proportion_z_test, ProportionTest};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::aggregator::{EventAggregator, EventLog, VariantCounters};
use crate::experiment::{DistributionMode, ExperimentStatus};
use crate::registry::{ExperimentView, VariantRegistry, WEIGHT_TOLERANCE};
use crate::{Error, Result};

/// Result of one optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OptimizationOutcome {
    /// New weights were committed.
    Rebalanced {
        /// Content unit whose snapshot must be republished
        content_unit: String,
        /// Weights before the pass
        previous: Vec<(String, f64)>,
        /// Weights after the pass
        weights: Vec<(String, f64)>,
        /// Best significantly-better variant, if any
        leader: Option<String>,
        /// Entry revision after the write
        version: u64,
    },
    /// A variant has fewer impressions than the minimum sample size.
    InsufficientData {
        /// First variant below the threshold
        variant_id: String,
        /// Its impressions
        impressions: u64,
        /// The threshold
        required: u64,
    },
    /// No variant differs from control at the required confidence.
    NoSignificantDifference,
    /// The experiment is not running.
    ExperimentNotRunning {
        /// Its current status
        status: ExperimentStatus,
    },
    /// The experiment is in manual mode.
    ManualDistribution,
    /// The policy target is already reached.
    Converged,
    /// The entry changed while the pass was computing.
    Superseded,
}

impl OptimizationOutcome {
    /// Whether weights were changed.
    #[must_use]
    pub const fn is_rebalanced(&self) -> bool {
        matches!(self, Self::Rebalanced { .. })
    }

    /// Short outcome label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Rebalanced { .. } => "rebalanced",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::NoSignificantDifference => "no_significant_difference",
            Self::ExperimentNotRunning { .. } => "experiment_not_running",
            Self::ManualDistribution => "manual_distribution",
            Self::Converged => "converged",
            Self::Superseded => "superseded",
        }
    }
}

/// Traffic optimizer over a shared registry.
///
/// The significance test is fixed; the reallocation strategy is the
/// swappable `P`.
pub struct TrafficOptimizer<P: ReallocationPolicy = BoundedStepPolicy> {
    registry: Arc<VariantRegistry>,
    policy: P,
}

impl<P: ReallocationPolicy> TrafficOptimizer<P> {
    /// Create an optimizer writing to `registry`.
    #[must_use]
    pub const fn new(registry: Arc<VariantRegistry>, policy: P) -> Self {
        Self { registry, policy }
    }

    /// The reallocation policy.
    #[must_use]
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    /// Run one optimization pass.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::InvalidConfiguration` for a confidence level outside (0, 1),
    ///   no variants or no control
    /// - `Error::ExperimentDeleted` if the experiment was deleted mid-pass
    /// - `Error::Validation` if the policy produced an invalid vector
    pub fn optimize<L: EventLog>(
        &self,
        experiment_id: &str,
        aggregator: &EventAggregator<L>,
    ) -> Result<OptimizationOutcome> {
        let view = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?;
        let experiment = view.experiment();

        if experiment.status() != ExperimentStatus::Running {
            return Ok(self.skip(
                experiment_id,
                OptimizationOutcome::ExperimentNotRunning {
                    status: experiment.status(),
                },
            ));
        }
        if experiment.distribution_mode() == DistributionMode::Manual {
            return Ok(self.skip(experiment_id, OptimizationOutcome::ManualDistribution));
        }

        let counters = counters_for(&view, aggregator, experiment_id)?;
        let required = experiment.min_sample_size();
        if let Some((variant_id, c)) = counters.iter().find(|(_, c)| c.impressions < required) {
            return Ok(self.skip(
                experiment_id,
                OptimizationOutcome::InsufficientData {
                    variant_id: variant_id.clone(),
                    impressions: c.impressions,
                    required,
                },
            ));
        }

        let reports = analyze(&view, &counters)?;
        if reports
            .iter()
            .all(|r| matches!(r.verdict, Verdict::Control | Verdict::Inconclusive))
        {
            return Ok(self.skip(experiment_id, OptimizationOutcome::NoSignificantDifference));
        }

        let next = self.policy.reallocate(&reports);
        let previous = view.weights();
        if previous
            .iter()
            .zip(&next)
            .all(|((_, current), proposed)| (current - proposed).abs() < WEIGHT_TOLERANCE)
        {
            return Ok(self.skip(experiment_id, OptimizationOutcome::Converged));
        }

        let weights: Vec<(String, f64)> = previous
            .iter()
            .map(|(id, _)| id.clone())
            .zip(next)
            .collect();

        let applied = match self
            .registry
            .apply_weights_if(experiment_id, view.version(), &weights)
        {
            Ok(applied) => applied,
            // Removed from the map between our read and the write.
            Err(Error::UnknownExperiment(_)) => {
                return Err(Error::ExperimentDeleted(experiment_id.to_string()))
            }
            Err(e) => return Err(e),
        };
        if applied.is_none() {
            return Ok(self.skip(experiment_id, OptimizationOutcome::Superseded));
        }

        let leader = leader_of(&reports);
        info!(
            experiment_id,
            ?previous,
            ?weights,
            leader = leader.as_deref().unwrap_or("-"),
            "traffic rebalanced"
        );
        Ok(OptimizationOutcome::Rebalanced {
            content_unit: experiment.content_unit().to_string(),
            previous,
            weights,
            leader,
            version: view.version() + 1,
        })
    }

    /// Per-variant statistics against control, without touching weights.
    ///
    /// Works in any status and mode.
    ///
    /// # Errors
    ///
    /// - `Error::UnknownExperiment` if the experiment is not registered
    /// - `Error::InvalidConfiguration` for a bad confidence level or no control
    pub fn report<L: EventLog>(
        &self,
        experiment_id: &str,
        aggregator: &EventAggregator<L>,
    ) -> Result<Vec<VariantReport>> {
        let view = self
            .registry
            .get(experiment_id)
            .ok_or_else(|| Error::UnknownExperiment(experiment_id.to_string()))?;
        let counters = counters_for(&view, aggregator, experiment_id)?;
        analyze(&view, &counters)
    }

    #[allow(clippy::unused_self)]
    fn skip(&self, experiment_id: &str, outcome: OptimizationOutcome) -> OptimizationOutcome {
        debug!(experiment_id, outcome = outcome.label(), "optimization pass left weights unchanged");
        outcome
    }
}

fn counters_for<L: EventLog>(
    view: &ExperimentView,
    aggregator: &EventAggregator<L>,
    experiment_id: &str,
) -> Result<Vec<(String, VariantCounters)>> {
    if view.variants().is_empty() {
        return Err(Error::InvalidConfiguration(format!(
            "experiment {experiment_id} has no variants"
        )));
    }
    Ok(view
        .variants()
        .iter()
        .map(|v| {
            (
                v.variant_id().to_string(),
                aggregator.variant_counters(experiment_id, v.variant_id()),
            )
        })
        .collect())
}

/// Compare every variant with control. Pure; holds no locks.
fn analyze(view: &ExperimentView, counters: &[(String, VariantCounters)]) -> Result<Vec<VariantReport>> {
    let experiment = view.experiment();
    let confidence = experiment.confidence_level();
    check_confidence(confidence)?;
    let goal = experiment.optimization_goal();

    let control = view.control().ok_or_else(|| {
        Error::InvalidConfiguration(format!(
            "experiment {} has no control variant",
            experiment.experiment_id()
        ))
    })?;
    let control_counters = counters
        .iter()
        .find(|(id, _)| id == control.variant_id())
        .map(|(_, c)| *c)
        .unwrap_or_default();

    view.variants()
        .iter()
        .zip(counters)
        .map(|(variant, (_, c))| {
            let (test, verdict) = if variant.is_control() {
                (None, Verdict::Control)
            } else {
                let test = two_proportion_z_test(
                    control_counters.goal_sessions(goal),
                    control_counters.impressions,
                    c.goal_sessions(goal),
                    c.impressions,
                )?;
                let verdict = match test {
                    Some(t) if t.is_significant(confidence) && t.z_score > 0.0 => Verdict::Better,
                    Some(t) if t.is_significant(confidence) && t.z_score < 0.0 => Verdict::Worse,
                    _ => Verdict::Inconclusive,
                };
                (test, verdict)
            };
            Ok(VariantReport {
                variant_id: variant.variant_id().to_string(),
                is_control: variant.is_control(),
                weight: variant.weight(),
                impressions: c.impressions,
                successes: c.successes(goal),
                goal_sessions: c.goal_sessions(goal),
                rate: c.rate(goal),
                z_score: test.map(|t| t.z_score),
                p_value: test.map(|t| t.p_value),
                verdict,
            })
        })
        .collect()
}

fn leader_of(reports: &[VariantReport]) -> Option<String> {
    reports
        .iter()
        .filter(|r| r.verdict == Verdict::Better)
        .max_by(|a, b| a.rate.total_cmp(&b.rate))
        .map(|r| r.variant_id.clone())
}
