//! Assignment Resolver - deterministic session-to-variant bucketing
//!
//! `assign` is a pure function of `(experiment id, weight vector, session key)`:
//!
//! 1. Hash `experiment_id ‖ 0x1f ‖ session_key` with SHA-256 and map the first
//!    53 bits to a uniform bucket in `[0, 100)`.
//! 2. Walk the variants control first, then in their given order,
//!    accumulating weight.
//! 3. Pick the first variant whose cumulative weight exceeds the bucket.
//!
//! Salting with the experiment id keeps buckets independent between
//! experiments that share a page; a session that lands in the top 10% of one
//! experiment is not systematically in the top 10% of the next.
//!
//! ## Reassignment on weight change
//!
//! Assignment is not pinned per session. When weights move, a session whose
//! bucket lies between the old and new cumulative boundaries switches
//! variant; every other session keeps its variant. For a two-variant
//! experiment moving from `[50, 50]` to `[40, 60]`, exactly the sessions with
//! buckets in `[40, 50)` flip from control to treatment. Impression
//! de-duplication is per experiment, so a flipped session is still counted
//! once, under the variant it saw first.
//!
//! Buckets must match in every process and release that evaluates a
//! published snapshot, so the hash is SHA-256 rather than `DefaultHasher`.

use sha2::{Digest, Sha256};

use crate::experiment::Variant;
use crate::registry::WEIGHT_TOLERANCE;
use crate::{Error, Result};

/// Width of the bucket space (weights are percentages).
pub const BUCKET_SPACE: f64 = 100.0;

const SALT_SEPARATOR: u8 = 0x1f;

/// A variant with a traffic weight, as seen by the resolver.
///
/// Implemented by registry [`Variant`]s and by published snapshot entries,
/// so the same resolver runs server-side and against a snapshot.
pub trait WeightedVariant {
    /// Variant identifier.
    fn variant_id(&self) -> &str;
    /// Traffic weight in percent.
    fn weight(&self) -> f64;
    /// Whether this is the control variant.
    fn is_control(&self) -> bool;
}

impl WeightedVariant for Variant {
    fn variant_id(&self) -> &str {
        Self::variant_id(self)
    }

    fn weight(&self) -> f64 {
        Self::weight(self)
    }

    fn is_control(&self) -> bool {
        Self::is_control(self)
    }
}

/// Map a session to its bucket in `[0, 100)` for an experiment.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn bucket(experiment_id: &str, session_key: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.as_bytes());
    hasher.update([SALT_SEPARATOR]);
    hasher.update(session_key.as_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // Top 53 bits: exactly representable in an f64 mantissa.
    let bits = u64::from_be_bytes(head) >> 11;
    (bits as f64 / (1u64 << 53) as f64) * BUCKET_SPACE
}

/// Resolve the variant a session sees.
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` if `variants` is empty, any weight is
/// negative or not finite, or the weights do not sum to `100 ± 0.01`. The
/// resolver never falls back to a default variant on malformed input.
pub fn assign<'a, V: WeightedVariant>(
    experiment_id: &str,
    variants: &'a [V],
    session_key: &str,
) -> Result<&'a V> {
    check_weights(experiment_id, variants)?;

    let target = bucket(experiment_id, session_key);
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for variant in walk_order(variants) {
        if variant.weight() <= 0.0 {
            continue;
        }
        cumulative += variant.weight();
        last_positive = Some(variant);
        if target < cumulative {
            return Ok(variant);
        }
    }

    // Weights summing to slightly under 100 leave a sliver at the top of the
    // bucket space; it belongs to the last variant that receives traffic.
    last_positive.ok_or_else(|| {
        Error::InvalidConfiguration(format!(
            "experiment '{experiment_id}' has no variant with positive weight"
        ))
    })
}

/// Variants in resolver order: control first, then the rest as given.
pub fn walk_order<V: WeightedVariant>(variants: &[V]) -> impl Iterator<Item = &V> {
    variants
        .iter()
        .filter(|v| v.is_control())
        .chain(variants.iter().filter(|v| !v.is_control()))
}

fn check_weights<V: WeightedVariant>(experiment_id: &str, variants: &[V]) -> Result<()> {
    if variants.is_empty() {
        return Err(Error::InvalidConfiguration(format!(
            "experiment '{experiment_id}' has no variants"
        )));
    }
    if let Some(bad) = variants
        .iter()
        .find(|v| !v.weight().is_finite() || v.weight() < 0.0)
    {
        return Err(Error::InvalidConfiguration(format!(
            "variant '{}' of experiment '{experiment_id}' has malformed weight {}",
            bad.variant_id(),
            bad.weight()
        )));
    }
    let sum: f64 = variants.iter().map(WeightedVariant::weight).sum();
    if (sum - BUCKET_SPACE).abs() > WEIGHT_TOLERANCE {
        return Err(Error::InvalidConfiguration(format!(
            "weights of experiment '{experiment_id}' sum to {sum}, expected 100"
        )));
    }
    Ok(())
}
