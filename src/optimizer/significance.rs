//! Two-proportion z-test
//!
//! Pooled-variance z statistic for `H0: p_treatment == p_control`, with a
//! two-sided p-value from the standard normal CDF.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::{Error, Result};

/// Outcome of comparing one treatment proportion against control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProportionTest {
    /// `(p_treatment - p_control) / se_pooled`; positive means treatment is higher
    pub z_score: f64,
    /// Two-sided p-value
    pub p_value: f64,
}

impl ProportionTest {
    /// Whether the difference is significant at `confidence_level`.
    #[must_use]
    pub fn is_significant(&self, confidence_level: f64) -> bool {
        self.p_value < 1.0 - confidence_level
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| Error::InvalidConfiguration(e.to_string()))
}

/// Check a confidence level lies strictly inside (0, 1).
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` otherwise.
pub fn check_confidence(confidence_level: f64) -> Result<()> {
    if confidence_level > 0.0 && confidence_level < 1.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "confidence level must be within (0, 1), got {confidence_level}"
        )))
    }
}

/// Two-sided critical z value for a confidence level (1.96 at 0.95).
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` if the level is outside (0, 1).
pub fn critical_z(confidence_level: f64) -> Result<f64> {
    check_confidence(confidence_level)?;
    Ok(standard_normal()?.inverse_cdf(1.0 - (1.0 - confidence_level) / 2.0))
}

/// Compare treatment against control.
///
/// Returns `Ok(None)` when the test is undefined: either arm has no trials,
/// or both arms are all-success/all-failure (zero pooled variance).
///
/// # Errors
///
/// Returns `Error::InvalidConfiguration` if the normal distribution cannot be built.
#[allow(clippy::cast_precision_loss)]
pub fn two_proportion_z_test(
    control_successes: u64,
    control_trials: u64,
    treatment_successes: u64,
    treatment_trials: u64,
) -> Result<Option<ProportionTest>> {
    if control_trials == 0 || treatment_trials == 0 {
        return Ok(None);
    }
    let (x1, n1) = (control_successes as f64, control_trials as f64);
    let (x2, n2) = (treatment_successes as f64, treatment_trials as f64);
    let p1 = x1 / n1;
    let p2 = x2 / n2;

    let pooled = (x1 + x2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if !se.is_finite() || se <= 0.0 {
        return Ok(None);
    }

    let z_score = (p2 - p1) / se;
    let p_value = 2.0 * (1.0 - standard_normal()?.cdf(z_score.abs()));
    Ok(Some(ProportionTest {
        z_score,
        p_value: p_value.clamp(0.0, 1.0),
    }))
}
