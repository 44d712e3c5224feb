//! Property-based tests for validation and assignment
//!
//! - Test weight-vector invariants
//! - Test resolver determinism and totality
//! - Run with ProptestConfig::with_cases(100)

use pagesplit::assignment::{assign, bucket};
use pagesplit::error::ValidationError;
use pagesplit::experiment::{Experiment, Variant};
use pagesplit::registry::validate;
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Integer weights (in hundredths) that sum to exactly 100.00
fn arb_weight_vector() -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(1u32..1000, 2..6).prop_map(|raw| {
        let total: u32 = raw.iter().sum();
        let mut hundredths: Vec<u32> = raw.iter().map(|r| r * 10_000 / total).collect();
        let assigned: u32 = hundredths.iter().sum();
        hundredths[0] += 10_000 - assigned;
        hundredths.iter().map(|h| f64::from(*h) / 100.0).collect()
    })
}

fn variants(weights: &[f64]) -> Vec<Variant> {
    weights
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i == 0 {
                Variant::control(format!("v{i}"), "exp-p", *w)
            } else {
                Variant::new(format!("v{i}"), "exp-p", *w)
            }
        })
        .collect()
}

fn experiment() -> Experiment {
    Experiment::new("exp-p", "Property", "unit-p")
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: every vector summing to 100 validates
    #[test]
    fn prop_valid_vectors_accepted(weights in arb_weight_vector()) {
        prop_assert!(validate(&experiment(), &variants(&weights)).is_ok());
    }

    /// Property: shifting the sum outside 100 ± 0.01 is rejected
    #[test]
    fn prop_off_sum_vectors_rejected(
        weights in arb_weight_vector(),
        delta in prop_oneof![0.02f64..20.0, -20.0f64..-0.02],
    ) {
        let mut shifted = weights;
        // Keep the shifted weight inside [0, 100] so only the sum is wrong.
        let last = shifted.len() - 1;
        shifted[last] = (shifted[last] + delta).clamp(0.0, 100.0);
        let sum: f64 = shifted.iter().sum();
        prop_assume!((sum - 100.0).abs() > 0.01);

        let result = validate(&experiment(), &variants(&shifted));
        prop_assert!(matches!(result, Err(ValidationError::WeightSum(_))));
    }

    /// Property: assignment is deterministic for an unchanged vector
    #[test]
    fn prop_assignment_deterministic(
        weights in arb_weight_vector(),
        session in "[a-z0-9-]{1,32}",
    ) {
        let variants = variants(&weights);
        let first = assign("exp-p", &variants, &session).unwrap().variant_id().to_string();
        for _ in 0..3 {
            prop_assert_eq!(assign("exp-p", &variants, &session).unwrap().variant_id(), first.as_str());
        }
    }

    /// Property: a variant with zero weight is never assigned
    #[test]
    fn prop_zero_weight_never_assigned(session in "[a-z0-9]{1,24}") {
        let variants = variants(&[60.0, 0.0, 40.0]);
        prop_assert_ne!(assign("exp-p", &variants, &session).unwrap().variant_id(), "v1");
    }

    /// Property: buckets stay in [0, 100)
    #[test]
    fn prop_bucket_in_range(experiment_id in ".{0,16}", session in ".{0,64}") {
        let b = bucket(&experiment_id, &session);
        prop_assert!((0.0..100.0).contains(&b));
    }
}
