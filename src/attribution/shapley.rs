//! Exact Shapley attribution over coalition values.
//!
//! For N ≤ 16 all 2^N coalitions are enumerated, which makes the
//! axiomatic guarantees (efficiency, symmetry, null player) hold to
//! machine epsilon. Larger vocabularies fall back to permutation
//! sampling with a sampling-error confidence.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::dynamics::MAX_DIMENSIONS;
use crate::utils::numerics::safe_divide;

/// Below this total |Δw| the session carried no usable signal and the
/// coalition value degrades to a uniform share.
const CHANGE_FLOOR: f64 = 1e-10;

/// Permutations drawn on the sampling path.
const SAMPLE_PERMUTATIONS: usize = 200;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShapleyAttribution {
    pub values: Vec<f64>,
    /// 1.0 on the exact path; sampling-derived in [0,1] otherwise.
    pub confidence: f64,
}

impl ShapleyAttribution {
    pub fn zeros(n: usize) -> Self {
        ShapleyAttribution {
            values: vec![0.0; n],
            confidence: 1.0,
        }
    }
}

/// Per-dimension share underlying the coalition value function.
///
/// With enough correlation history the share follows |corr|; before that
/// it follows the session's |Δw|; with neither, it is uniform.
fn dimension_shares(weight_changes: &[f64], correlations: Option<&[f64]>) -> Vec<f64> {
    let n = weight_changes.len();
    if let Some(corr) = correlations {
        let total: f64 = corr.iter().map(|c| c.abs()).sum();
        if total > 1e-12 {
            return corr.iter().map(|c| c.abs() / total).collect();
        }
    }
    let total: f64 = weight_changes.iter().map(|c| c.abs()).sum();
    if total >= CHANGE_FLOOR {
        return weight_changes.iter().map(|c| c.abs() / total).collect();
    }
    vec![1.0 / n.max(1) as f64; n]
}

/// v(S) = R · Σ_{i∈S} share[i]
fn coalition_value(mask: u32, r: f64, shares: &[f64]) -> f64 {
    let mut acc = 0.0;
    for (i, s) in shares.iter().enumerate() {
        if mask & (1 << i) != 0 {
            acc += s;
        }
    }
    r * acc
}

/// Shapley attribution of the session outcome `r` across dimensions.
///
/// `correlations` should be passed once the tracker has seen enough
/// sessions (the orchestrator gates on its session count).
pub fn compute_shapley(
    r: f64,
    weight_changes: &[f64],
    correlations: Option<&[f64]>,
) -> ShapleyAttribution {
    let n = weight_changes.len();
    if n == 0 {
        return ShapleyAttribution::zeros(0);
    }
    let shares = dimension_shares(weight_changes, correlations);
    if n <= MAX_DIMENSIONS {
        exact_shapley(n, r, &shares)
    } else {
        sampled_shapley(n, r, &shares)
    }
}

/// Factorials as f64, exact up to 17!.
fn factorials(n: usize) -> Vec<f64> {
    let mut f = vec![1.0; n + 1];
    for i in 1..=n {
        f[i] = f[i - 1] * i as f64;
    }
    f
}

fn exact_shapley(n: usize, r: f64, shares: &[f64]) -> ShapleyAttribution {
    let fact = factorials(n);
    let full: u32 = (1u32 << n) - 1;

    // Precompute v over all coalitions.
    let v: Vec<f64> = (0..=full)
        .map(|mask| coalition_value(mask, r, shares))
        .collect();

    // Marginals grouped by coalition size, so symmetric dimensions
    // accumulate bitwise-identical sums.
    let mut values = vec![0.0; n];
    for (i, value) in values.iter_mut().enumerate() {
        let bit = 1u32 << i;
        let mut by_size = vec![0.0; n];
        let mut mask: u32 = 0;
        loop {
            if mask & bit == 0 {
                let s = mask.count_ones() as usize;
                by_size[s] += v[(mask | bit) as usize] - v[mask as usize];
            }
            if mask == full {
                break;
            }
            mask += 1;
        }
        for (s, total) in by_size.iter().enumerate() {
            *value += fact[s] * fact[n - s - 1] / fact[n] * total;
        }
    }

    ShapleyAttribution {
        values,
        confidence: 1.0,
    }
}

/// Monte-Carlo fallback for vocabularies beyond the exact cap. Only
/// reachable when a caller bypasses the `Vocabulary` constructor limit.
fn sampled_shapley(n: usize, r: f64, shares: &[f64]) -> ShapleyAttribution {
    let mut rng = rand::thread_rng();
    let mut order: Vec<usize> = (0..n).collect();
    let mut sums = vec![0.0; n];
    let mut sq_sums = vec![0.0; n];

    for _ in 0..SAMPLE_PERMUTATIONS {
        order.shuffle(&mut rng);
        let mut prefix = 0.0;
        for &i in &order {
            // Additive value function: the marginal of i is independent of
            // the prefix, but keep the prefix walk so a richer v drops in.
            let with = prefix + r * shares[i];
            let marginal = with - prefix;
            sums[i] += marginal;
            sq_sums[i] += marginal * marginal;
            prefix = with;
        }
    }

    let k = SAMPLE_PERMUTATIONS as f64;
    let values: Vec<f64> = sums.iter().map(|s| s / k).collect();
    let mut conf_acc = 0.0;
    for i in 0..n {
        let mean = values[i];
        let var = (sq_sums[i] / k - mean * mean).max(0.0);
        let stderr = (var / k).sqrt();
        conf_acc += (1.0 - safe_divide(stderr, mean.abs() + 1e-9, 1.0)).clamp(0.0, 1.0);
    }

    ShapleyAttribution {
        values,
        confidence: (conf_acc / n as f64).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_sums_to_grand_coalition() {
        let changes = vec![0.05, 0.03, 0.02, 0.01];
        let attr = compute_shapley(0.5, &changes, None);
        let total: f64 = attr.values.iter().sum();
        assert!((total - 0.5).abs() < 1e-10, "sum {}", total);
        assert_eq!(attr.confidence, 1.0);
    }

    #[test]
    fn null_player_gets_exactly_zero() {
        let changes = vec![0.05, 0.03, 0.02, 0.0];
        let attr = compute_shapley(0.5, &changes, None);
        assert_eq!(attr.values[3], 0.0);
        let total: f64 = attr.values.iter().sum();
        assert!((total - 0.5).abs() < 1e-10);
    }

    #[test]
    fn symmetric_dimensions_match_exactly() {
        let changes = vec![0.04, 0.01, 0.04, 0.02];
        let attr = compute_shapley(0.8, &changes, None);
        assert_eq!(attr.values[0], attr.values[2]);
    }

    #[test]
    fn zero_outcome_yields_zero_everywhere() {
        let attr = compute_shapley(0.0, &[0.05, 0.03, 0.02, 0.01], None);
        assert!(attr.values.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn no_signal_degrades_to_uniform() {
        let attr = compute_shapley(0.4, &[0.0, 0.0, 0.0, 0.0], None);
        for v in &attr.values {
            assert!((v - 0.1).abs() < 1e-10);
        }
    }

    #[test]
    fn correlation_shares_take_precedence() {
        let changes = vec![0.05, 0.0, 0.0, 0.0];
        let corr = vec![0.0, 1.0, 0.0, 0.0];
        let attr = compute_shapley(1.0, &changes, Some(&corr));
        assert!((attr.values[1] - 1.0).abs() < 1e-10);
        assert_eq!(attr.values[0], 0.0);
    }

    #[test]
    fn sampled_path_keeps_efficiency_and_confidence_bounds() {
        let changes: Vec<f64> = (0..20).map(|i| 0.01 * (i + 1) as f64).collect();
        let attr = compute_shapley(1.0, &changes, None);
        let total: f64 = attr.values.iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(attr.confidence >= 0.0 && attr.confidence <= 1.0);
    }

    #[test]
    fn empty_vocabulary_is_empty_attribution() {
        let attr = compute_shapley(0.7, &[], None);
        assert!(attr.values.is_empty());
    }
}
