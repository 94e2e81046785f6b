//! Running covariance between per-dimension metrics and session outcome.
//!
//! Welford's online update keeps means, variances and co-moments without
//! storing the session history. The metrics fed here are signed
//! deviations, not magnitudes — correlation sign carries the information.

use serde::{Deserialize, Serialize};

use crate::utils::numerics::{safe_divide, safe_finite};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationTracker {
    n: usize,
    count: u64,
    mean_metrics: Vec<f64>,
    mean_outcome: f64,
    /// Σ (x − mean)² per metric
    m2_metrics: Vec<f64>,
    /// Σ (y − mean)²
    m2_outcome: f64,
    /// Σ (x − mean_new)(y − mean_old) co-moment per metric
    comoment: Vec<f64>,
}

impl CorrelationTracker {
    pub fn new(n: usize) -> Self {
        CorrelationTracker {
            n,
            count: 0,
            mean_metrics: vec![0.0; n],
            mean_outcome: 0.0,
            m2_metrics: vec![0.0; n],
            m2_outcome: 0.0,
            comoment: vec![0.0; n],
        }
    }

    pub fn dims(&self) -> usize {
        self.n
    }

    pub fn sessions(&self) -> u64 {
        self.count
    }

    /// One Welford step with a full metric vector and the session outcome.
    pub fn update(&mut self, metrics: &[f64], outcome: f64) {
        if metrics.len() != self.n {
            tracing::warn!(
                "[Correlation] metric vector length {} != {}, skipping update",
                metrics.len(),
                self.n
            );
            return;
        }
        let outcome = safe_finite(outcome, 0.0);
        self.count += 1;
        let k = self.count as f64;

        let dy_old = outcome - self.mean_outcome;
        self.mean_outcome += dy_old / k;
        let dy_new = outcome - self.mean_outcome;
        self.m2_outcome += dy_old * dy_new;

        for i in 0..self.n {
            let x = safe_finite(metrics[i], 0.0);
            let dx_old = x - self.mean_metrics[i];
            self.mean_metrics[i] += dx_old / k;
            let dx_new = x - self.mean_metrics[i];
            self.m2_metrics[i] += dx_old * dx_new;
            self.comoment[i] += dx_new * dy_old;
        }
    }

    pub fn metric_means(&self) -> &[f64] {
        &self.mean_metrics
    }

    /// Per-metric variance, clamped non-negative.
    pub fn metric_variances(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![0.0; self.n];
        }
        let k = self.count as f64;
        self.m2_metrics.iter().map(|m2| (m2 / k).max(0.0)).collect()
    }

    pub fn outcome_variance(&self) -> f64 {
        if self.count < 2 {
            return 0.0;
        }
        (self.m2_outcome / self.count as f64).max(0.0)
    }

    /// Pearson correlation per metric; degenerate variance falls back to
    /// zero, never NaN.
    pub fn correlations(&self) -> Vec<f64> {
        if self.count < 2 {
            return vec![0.0; self.n];
        }
        let var_y = self.m2_outcome.max(0.0);
        (0..self.n)
            .map(|i| {
                let denom = (self.m2_metrics[i].max(0.0) * var_y).sqrt();
                safe_divide(self.comoment[i], denom, 0.0).clamp(-1.0, 1.0)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_give_zero_variance_and_correlation() {
        let mut t = CorrelationTracker::new(3);
        for _ in 0..10 {
            t.update(&[0.2, 0.2, 0.2], 0.5);
        }
        assert_eq!(t.metric_variances(), vec![0.0, 0.0, 0.0]);
        let corr = t.correlations();
        assert!(corr.iter().all(|c| *c == 0.0), "{:?}", corr);
    }

    #[test]
    fn perfectly_aligned_metric_correlates_to_one() {
        let mut t = CorrelationTracker::new(2);
        for k in 0..20 {
            let x = k as f64 / 20.0;
            // metric 0 tracks outcome exactly, metric 1 opposes it
            t.update(&[x, -x], x);
        }
        let corr = t.correlations();
        assert!((corr[0] - 1.0).abs() < 1e-9);
        assert!((corr[1] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn running_mean_converges_on_repeats() {
        let mut t = CorrelationTracker::new(1);
        let mut deviations = Vec::new();
        for _ in 0..8 {
            t.update(&[0.4], 0.6);
            deviations.push((t.metric_means()[0] - 0.4).abs());
        }
        for pair in deviations.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-15);
        }
    }

    #[test]
    fn non_finite_inputs_are_coerced() {
        let mut t = CorrelationTracker::new(2);
        t.update(&[f64::NAN, 1.0], f64::INFINITY);
        t.update(&[0.5, 0.5], 0.5);
        assert!(t.correlations().iter().all(|c| c.is_finite()));
    }

    #[test]
    fn length_mismatch_is_skipped() {
        let mut t = CorrelationTracker::new(3);
        t.update(&[1.0], 0.5);
        assert_eq!(t.sessions(), 0);
    }
}
