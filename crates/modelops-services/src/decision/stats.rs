//! Significance test for promotion decisions.
//!
//! mAP50 is treated as a detection-level success proportion over
//! `sample_size` evaluated detections, and candidate vs. baseline is
//! compared with a one-sided two-proportion z-test.

/// Outcome of a two-proportion z-test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProportionTest {
    /// Standardized difference `(p1 - p2) / se`.
    pub z: f64,
    /// One-sided p-value for H1: `p1 > p2`.
    pub p_value: f64,
}

impl ProportionTest {
    /// Whether the test rejects H0 at `confidence` (e.g. 0.95).
    pub fn is_significant(&self, confidence: f64) -> bool {
        self.p_value < 1.0 - confidence
    }
}

/// One-sided pooled two-proportion z-test of `p1 > p2`.
///
/// Returns `None` when the test is undefined: an empty sample, a
/// proportion outside `[0, 1]`, or zero pooled variance.
pub fn two_proportion_z_test(p1: f64, n1: u64, p2: f64, n2: u64) -> Option<ProportionTest> {
    if n1 == 0 || n2 == 0 {
        return None;
    }
    if !(0.0..=1.0).contains(&p1) || !(0.0..=1.0).contains(&p2) {
        return None;
    }

    let (n1, n2) = (n1 as f64, n2 as f64);
    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let variance = pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2);
    if variance <= 0.0 || !variance.is_finite() {
        return None;
    }

    let z = (p1 - p2) / variance.sqrt();
    Some(ProportionTest {
        z,
        p_value: 1.0 - normal_cdf(z),
    })
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

// Abramowitz and Stegun 7.1.26, max error 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}
