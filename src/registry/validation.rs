//! Variant set validation
//!
//! Rules are checked in a fixed order so the first violated rule is the one
//! reported: variant count, ownership, duplicates, weight range, control
//! count, weight sum.

use rustc_hash::FxHashSet;

use crate::error::ValidationError;
use crate::experiment::{Experiment, Variant};

/// Allowed deviation of the weight sum from 100.
pub const WEIGHT_TOLERANCE: f64 = 0.01;

/// Upper bound of a single traffic weight.
pub const MAX_WEIGHT: f64 = 100.0;

/// Validate a variant set for an experiment.
///
/// # Errors
///
/// Returns the first violated rule:
/// - fewer than 2 variants
/// - a variant whose `experiment_id` is not `experiment`'s
/// - a duplicated variant id
/// - a weight outside `[0, 100]` (or NaN/infinite)
/// - not exactly one control
/// - weights not summing to `100 ± 0.01`
pub fn validate(experiment: &Experiment, variants: &[Variant]) -> Result<(), ValidationError> {
    if variants.len() < 2 {
        return Err(ValidationError::TooFewVariants(variants.len()));
    }

    let mut seen = FxHashSet::default();
    for variant in variants {
        if variant.experiment_id() != experiment.experiment_id() {
            return Err(ValidationError::ForeignVariant {
                experiment_id: experiment.experiment_id().to_string(),
                variant_id: variant.variant_id().to_string(),
            });
        }
        if !seen.insert(variant.variant_id()) {
            return Err(ValidationError::DuplicateVariant(
                variant.variant_id().to_string(),
            ));
        }
        check_weight(variant.variant_id(), variant.weight())?;
    }

    let controls = variants.iter().filter(|v| v.is_control()).count();
    if controls != 1 {
        return Err(ValidationError::ControlCount(controls));
    }

    check_sum(variants.iter().map(Variant::weight))
}

/// Check a single weight is finite and within `[0, 100]`.
///
/// # Errors
///
/// Returns `ValidationError::WeightOutOfRange` otherwise.
pub fn check_weight(variant_id: &str, weight: f64) -> Result<(), ValidationError> {
    if weight.is_finite() && (0.0..=MAX_WEIGHT).contains(&weight) {
        Ok(())
    } else {
        Err(ValidationError::WeightOutOfRange {
            variant_id: variant_id.to_string(),
            weight,
        })
    }
}

/// Check a weight vector sums to 100 within [`WEIGHT_TOLERANCE`].
///
/// # Errors
///
/// Returns `ValidationError::WeightSum` with the actual sum otherwise.
pub fn check_sum(weights: impl IntoIterator<Item = f64>) -> Result<(), ValidationError> {
    let sum: f64 = weights.into_iter().sum();
    if (sum - MAX_WEIGHT).abs() <= WEIGHT_TOLERANCE {
        Ok(())
    } else {
        Err(ValidationError::WeightSum(sum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment() -> Experiment {
        Experiment::new("exp-1", "Headline", "article-1")
    }

    #[test]
    fn test_valid_two_way_split() {
        let variants = vec![
            Variant::control("a", "exp-1", 50.0),
            Variant::new("b", "exp-1", 50.0),
        ];
        assert!(validate(&experiment(), &variants).is_ok());
    }

    #[test]
    fn test_sum_tolerance_boundary() {
        let within = vec![
            Variant::control("a", "exp-1", 33.335),
            Variant::new("b", "exp-1", 33.33),
            Variant::new("c", "exp-1", 33.33),
        ];
        assert!(validate(&experiment(), &within).is_ok());

        let outside = vec![
            Variant::control("a", "exp-1", 33.3),
            Variant::new("b", "exp-1", 33.3),
            Variant::new("c", "exp-1", 33.3),
        ];
        assert!(matches!(
            validate(&experiment(), &outside),
            Err(ValidationError::WeightSum(_))
        ));
    }

    #[test]
    fn test_single_variant_rejected() {
        let variants = vec![Variant::control("a", "exp-1", 100.0)];
        assert_eq!(
            validate(&experiment(), &variants),
            Err(ValidationError::TooFewVariants(1))
        );
    }

    #[test]
    fn test_control_count() {
        let none = vec![
            Variant::new("a", "exp-1", 50.0),
            Variant::new("b", "exp-1", 50.0),
        ];
        assert_eq!(
            validate(&experiment(), &none),
            Err(ValidationError::ControlCount(0))
        );

        let two = vec![
            Variant::control("a", "exp-1", 50.0),
            Variant::control("b", "exp-1", 50.0),
        ];
        assert_eq!(
            validate(&experiment(), &two),
            Err(ValidationError::ControlCount(2))
        );
    }

    #[test]
    fn test_negative_weight_rejected() {
        let variants = vec![
            Variant::control("a", "exp-1", 110.0),
            Variant::new("b", "exp-1", -10.0),
        ];
        assert!(matches!(
            validate(&experiment(), &variants),
            Err(ValidationError::WeightOutOfRange { .. })
        ));
    }

    #[test]
    fn test_nan_weight_rejected() {
        assert!(check_weight("a", f64::NAN).is_err());
        assert!(check_weight("a", f64::INFINITY).is_err());
        assert!(check_weight("a", 0.0).is_ok());
        assert!(check_weight("a", 100.0).is_ok());
    }

    #[test]
    fn test_foreign_and_duplicate_variants() {
        let foreign = vec![
            Variant::control("a", "exp-1", 50.0),
            Variant::new("b", "exp-2", 50.0),
        ];
        assert!(matches!(
            validate(&experiment(), &foreign),
            Err(ValidationError::ForeignVariant { .. })
        ));

        let duplicate = vec![
            Variant::control("a", "exp-1", 50.0),
            Variant::new("a", "exp-1", 50.0),
        ];
        assert_eq!(
            validate(&experiment(), &duplicate),
            Err(ValidationError::DuplicateVariant("a".to_string()))
        );
    }
}
