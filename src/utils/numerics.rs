//! Numeric guards at component boundaries.
//!
//! Every value crossing a subsystem boundary is coerced through these
//! helpers. A single NaN reaching an EMA poisons baselines, fitness and
//! meta-rates irreversibly, so non-finite inputs are swallowed here and
//! replaced with a caller-supplied fallback.

use tracing::warn;

/// Coerce a possibly non-finite value to a fallback.
pub fn safe_finite(x: f64, fallback: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        fallback
    }
}

/// Division that tolerates zero and non-finite denominators.
pub fn safe_divide(a: f64, b: f64, fallback: f64) -> f64 {
    if !a.is_finite() || !b.is_finite() || b == 0.0 {
        return fallback;
    }
    let q = a / b;
    if q.is_finite() {
        q
    } else {
        fallback
    }
}

/// Clamp with a fallback for non-finite input.
pub fn safe_clamp(x: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if x.is_finite() {
        x.clamp(lo, hi)
    } else {
        fallback
    }
}

/// Produce a new array with non-finite slots replaced.
pub fn sanitize_vec(xs: &[f64], fallback: f64) -> Vec<f64> {
    xs.iter().map(|&x| safe_finite(x, fallback)).collect()
}

/// Validate a deserialized numeric array by length and element finiteness.
///
/// Returns false (and logs) when the field should be treated as absent.
/// Rejecting the field, never the whole load, is what keeps a corrupted
/// save from bricking the identity.
pub fn validate_len_finite(name: &str, xs: &[f64], expected: usize) -> bool {
    if xs.len() != expected {
        warn!(
            "[Numerics] persisted field '{}' has length {} (expected {}), discarding",
            name,
            xs.len(),
            expected
        );
        return false;
    }
    if xs.iter().any(|x| !x.is_finite()) {
        warn!("[Numerics] persisted field '{}' contains non-finite values, discarding", name);
        return false;
    }
    true
}

/// Mean of a slice, 0.0 when empty.
pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population variance of a slice, clamped non-negative.
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    let v = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64;
    v.max(0.0)
}

/// Euclidean norm.
pub fn norm(xs: &[f64]) -> f64 {
    xs.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Logistic squash; non-finite input maps to 0.5.
pub fn sigmoid(x: f64) -> f64 {
    if !x.is_finite() {
        return 0.5;
    }
    1.0 / (1.0 + (-x).exp())
}
