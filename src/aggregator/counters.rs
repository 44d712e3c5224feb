//! Per-experiment counting state and per-variant counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};

use crate::experiment::{EventKind, EventRecord, OptimizationGoal};

/// Counting state of one experiment.
///
/// Rebuilding an experiment's counters replaces its tally as a whole, so
/// readers see either the old or the rebuilt counters, never a mix.
#[derive(Debug, Default)]
pub(crate) struct ExperimentTally {
    buckets: DashMap<String, Arc<BucketCounters>>,
    // sessions that already produced an impression
    viewed: DashSet<String>,
    // (variant, session) pairs seen on a bucket
    sessions: DashSet<(String, String)>,
    // (variant, session, kind) triples that already clicked or converted
    reached: DashSet<(String, String, EventKind)>,
}

impl ExperimentTally {
    /// Count one event; `false` for a repeated view.
    pub(crate) fn count(&self, event: &EventRecord) -> bool {
        let kind = event.kind();
        let session_key = event.session_key();

        if kind == EventKind::View && !self.viewed.insert(session_key.to_string()) {
            return false;
        }

        // Clone the Arc so the shard lock is released before incrementing.
        let bucket = Arc::clone(
            self.buckets
                .entry(event.variant_id().to_string())
                .or_default()
                .value(),
        );
        bucket.increment(kind);

        let variant_id = event.variant_id().to_string();
        if self
            .sessions
            .insert((variant_id.clone(), session_key.to_string()))
        {
            bucket.increment_sessions();
        }
        if kind != EventKind::View
            && self
                .reached
                .insert((variant_id, session_key.to_string(), kind))
        {
            bucket.increment_reached(kind);
        }
        true
    }

    pub(crate) fn variant(&self, variant_id: &str) -> VariantCounters {
        self.buckets
            .get(variant_id)
            .map(|bucket| bucket.snapshot())
            .unwrap_or_default()
    }
}

/// Live counters of one bucket. Every field is an independent atomic, so
/// increments never take a lock and never lose updates.
#[derive(Debug, Default)]
pub(crate) struct BucketCounters {
    impressions: AtomicU64,
    clicks: AtomicU64,
    conversions: AtomicU64,
    unique_sessions: AtomicU64,
    clicked_sessions: AtomicU64,
    converted_sessions: AtomicU64,
}

impl BucketCounters {
    pub(crate) fn increment(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::View => &self.impressions,
            EventKind::Click => &self.clicks,
            EventKind::Conversion => &self.conversions,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_sessions(&self) {
        self.unique_sessions.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn increment_reached(&self, kind: EventKind) {
        let counter = match kind {
            EventKind::View => return,
            EventKind::Click => &self.clicked_sessions,
            EventKind::Conversion => &self.converted_sessions,
        };
        counter.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> VariantCounters {
        VariantCounters {
            impressions: self.impressions.load(Ordering::Acquire),
            clicks: self.clicks.load(Ordering::Acquire),
            conversions: self.conversions.load(Ordering::Acquire),
            unique_sessions: self.unique_sessions.load(Ordering::Acquire),
            clicked_sessions: self.clicked_sessions.load(Ordering::Acquire),
            converted_sessions: self.converted_sessions.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time aggregate counters for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantCounters {
    /// Distinct-session views (first view per session per experiment)
    pub impressions: u64,
    /// Every click
    pub clicks: u64,
    /// Every conversion
    pub conversions: u64,
    /// Distinct sessions with any event on this variant
    pub unique_sessions: u64,
    /// Distinct sessions with at least one click on this variant
    pub clicked_sessions: u64,
    /// Distinct sessions with at least one conversion on this variant
    pub converted_sessions: u64,
}

impl VariantCounters {
    /// Numerator of the goal metric.
    #[must_use]
    pub const fn successes(&self, goal: OptimizationGoal) -> u64 {
        match goal {
            OptimizationGoal::ConversionRate => self.conversions,
            OptimizationGoal::ClickRate => self.clicks,
        }
    }

    /// Sessions that reached the goal at least once, capped at impressions.
    ///
    /// This is the success count of the significance test. Repeated clicks
    /// from one session count once, and the cap covers sessions whose
    /// first view landed on another variant, so the proportion stays in
    /// [0, 1].
    #[must_use]
    pub fn goal_sessions(&self, goal: OptimizationGoal) -> u64 {
        let reached = match goal {
            OptimizationGoal::ConversionRate => self.converted_sessions,
            OptimizationGoal::ClickRate => self.clicked_sessions,
        };
        reached.min(self.impressions)
    }

    /// Goal metric (`successes / impressions`), 0 without impressions.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self, goal: OptimizationGoal) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.successes(goal) as f64 / self.impressions as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_routes_by_kind() {
        let bucket = BucketCounters::default();
        bucket.increment(EventKind::View);
        bucket.increment(EventKind::Click);
        bucket.increment(EventKind::Click);
        bucket.increment(EventKind::Conversion);
        bucket.increment_sessions();
        bucket.increment_reached(EventKind::Click);
        bucket.increment_reached(EventKind::View);

        let snapshot = bucket.snapshot();
        assert_eq!(snapshot.impressions, 1);
        assert_eq!(snapshot.clicks, 2);
        assert_eq!(snapshot.conversions, 1);
        assert_eq!(snapshot.unique_sessions, 1);
        assert_eq!(snapshot.clicked_sessions, 1);
        assert_eq!(snapshot.converted_sessions, 0);
    }

    #[test]
    fn test_rate_by_goal() {
        let counters = VariantCounters {
            impressions: 200,
            clicks: 50,
            conversions: 10,
            unique_sessions: 200,
            ..VariantCounters::default()
        };
        assert!((counters.rate(OptimizationGoal::ClickRate) - 0.25).abs() < f64::EPSILON);
        assert!((counters.rate(OptimizationGoal::ConversionRate) - 0.05).abs() < f64::EPSILON);
        assert!(VariantCounters::default()
            .rate(OptimizationGoal::ClickRate)
            .abs()
            < f64::EPSILON);
    }

    #[test]
    fn test_goal_sessions_bounded_by_impressions() {
        let counters = VariantCounters {
            impressions: 200,
            clicks: 600,
            unique_sessions: 210,
            clicked_sessions: 205,
            converted_sessions: 3,
            ..VariantCounters::default()
        };
        assert_eq!(counters.goal_sessions(OptimizationGoal::ClickRate), 200);
        assert_eq!(counters.goal_sessions(OptimizationGoal::ConversionRate), 3);
        // The raw metric still counts every click.
        assert!((counters.rate(OptimizationGoal::ClickRate) - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tally_counts_repeat_clicks_once_per_session() {
        let tally = ExperimentTally::default();
        assert!(tally.count(&EventRecord::new("exp-1", "b", "s-1", EventKind::View)));
        assert!(!tally.count(&EventRecord::new("exp-1", "b", "s-1", EventKind::View)));
        for _ in 0..3 {
            assert!(tally.count(&EventRecord::new("exp-1", "b", "s-1", EventKind::Click)));
        }

        let counters = tally.variant("b");
        assert_eq!(counters.impressions, 1);
        assert_eq!(counters.clicks, 3);
        assert_eq!(counters.clicked_sessions, 1);
        assert_eq!(counters.unique_sessions, 1);
        assert_eq!(tally.variant("a"), VariantCounters::default());
    }
}
