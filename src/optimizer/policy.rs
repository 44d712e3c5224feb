//! Weight reallocation policies
//!
//! A policy maps the per-variant analysis of one pass to the next weight
//! vector. It is a pure function of its input; the optimizer owns reading
//! and committing weights.

use serde::{Deserialize, Serialize};

use crate::registry::MAX_WEIGHT;

/// Significance verdict of a variant compared with control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The variant is the control itself.
    Control,
    /// Significantly better than control.
    Better,
    /// Significantly worse than control.
    Worse,
    /// No significant difference (or the test is undefined).
    Inconclusive,
}

/// Analysis of one variant in an optimization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantReport {
    /// Variant id
    pub variant_id: String,
    /// Whether this is the control
    pub is_control: bool,
    /// Weight at the time of the pass
    pub weight: f64,
    /// Distinct-session impressions
    pub impressions: u64,
    /// Goal successes (clicks or conversions)
    pub successes: u64,
    /// Sessions that reached the goal, capped at impressions (the test's successes)
    pub goal_sessions: u64,
    /// `successes / impressions`
    pub rate: f64,
    /// z statistic against control (`None` for control or undefined tests)
    pub z_score: Option<f64>,
    /// Two-sided p-value against control
    pub p_value: Option<f64>,
    /// Significance verdict
    pub verdict: Verdict,
}

/// Strategy producing the next weight vector.
pub trait ReallocationPolicy: Send + Sync {
    /// Next weights, one per report and in the same order.
    ///
    /// Called only when at least one variant is significantly better or
    /// worse than control. The result must sum to 100.
    fn reallocate(&self, reports: &[VariantReport]) -> Vec<f64>;
}

/// Moves a bounded fraction of the way towards a target allocation.
///
/// - A significant winner exists: the best-performing winner targets all
///   traffic except `floor_weight` per other variant.
/// - Only significant losers exist: each loser targets `floor_weight` and
///   the freed weight targets control. This also walks back traffic from a
///   previous leader whose advantage reversed.
///
/// Each pass moves every weight by `max_step_fraction` of its distance to
/// the target, so a single pass never hands all traffic to one variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedStepPolicy {
    max_step_fraction: f64,
    floor_weight: f64,
}

impl BoundedStepPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_step_fraction: f64, floor_weight: f64) -> Self {
        Self {
            max_step_fraction,
            floor_weight,
        }
    }

    /// Fraction of the distance to the target covered per pass.
    #[must_use]
    pub const fn max_step_fraction(&self) -> f64 {
        self.max_step_fraction
    }

    /// Minimum weight the policy drives a variant towards.
    #[must_use]
    pub const fn floor_weight(&self) -> f64 {
        self.floor_weight
    }

    #[allow(clippy::cast_precision_loss)]
    fn target(&self, reports: &[VariantReport]) -> Vec<f64> {
        let n = reports.len();
        let floor = self.floor_weight.clamp(0.0, MAX_WEIGHT / n as f64);

        let leader = reports
            .iter()
            .enumerate()
            .filter(|(_, r)| r.verdict == Verdict::Better)
            .fold(None::<(usize, f64)>, |best, (i, r)| match best {
                Some((_, rate)) if rate >= r.rate => best,
                _ => Some((i, r.rate)),
            })
            .map(|(i, _)| i);

        if let Some(leader) = leader {
            let mut target = vec![floor; n];
            target[leader] = MAX_WEIGHT - floor * (n - 1) as f64;
            return target;
        }

        let mut target: Vec<f64> = reports.iter().map(|r| r.weight).collect();
        let mut freed = 0.0;
        for (slot, report) in target.iter_mut().zip(reports) {
            if report.verdict == Verdict::Worse && *slot > floor {
                freed += *slot - floor;
                *slot = floor;
            }
        }
        if let Some(control) = reports.iter().position(|r| r.is_control) {
            target[control] += freed;
        }
        target
    }
}

impl Default for BoundedStepPolicy {
    fn default() -> Self {
        Self::new(0.25, 5.0)
    }
}

impl ReallocationPolicy for BoundedStepPolicy {
    fn reallocate(&self, reports: &[VariantReport]) -> Vec<f64> {
        let target = self.target(reports);
        let stepped: Vec<f64> = reports
            .iter()
            .zip(&target)
            .map(|(r, t)| r.weight + self.max_step_fraction * (t - r.weight))
            .collect();
        normalize(&stepped)
    }
}

/// Round to two decimals and push the rounding residue onto the largest
/// weight so the vector sums to exactly 100.
#[must_use]
pub fn normalize(weights: &[f64]) -> Vec<f64> {
    let mut rounded: Vec<f64> = weights
        .iter()
        .map(|w| (w.max(0.0) * 100.0).round() / 100.0)
        .collect();

    let residue = MAX_WEIGHT - rounded.iter().sum::<f64>();
    if let Some(largest) = rounded
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    {
        rounded[largest] = ((rounded[largest] + residue) * 100.0).round() / 100.0;
    }
    rounded
}
