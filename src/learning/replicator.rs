//! Replicator weight optimizer.
//!
//! Combines three per-dimension forces — energy descent, outcome-scaled
//! attribution, and replicator pressure toward above-average fitness —
//! into a clipped weight delta. Fitness is an EMA over the *raw* session
//! outcome so a winning streak keeps reinforcing even after the baseline
//! catches up. Meta-learning rates follow recent attribution variance:
//! noisy dimensions explore, settled ones exploit.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dynamics::{MAX_WEIGHT, MIN_WEIGHT};
use crate::utils::numerics::{mean, safe_finite, variance};

pub const RATE_MIN: f64 = 0.5;
pub const RATE_MAX: f64 = 2.0;

/// One session's weight update with its component breakdown.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeightUpdate {
    pub delta: Vec<f64>,
    pub energy_term: Vec<f64>,
    pub outcome_term: Vec<f64>,
    pub replicator_term: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicatorOptimizer {
    fitness: Vec<f64>,
    meta_rates: Vec<f64>,
    session_count: u64,
    /// Rolling window of recent attributions, newest last.
    recent_attributions: VecDeque<Vec<f64>>,
    learning_rate: f64,
    clip: f64,
    fitness_rate: f64,
    window: usize,
}

impl ReplicatorOptimizer {
    pub fn new(n: usize) -> Self {
        ReplicatorOptimizer {
            fitness: vec![0.0; n],
            meta_rates: vec![1.0; n],
            session_count: 0,
            recent_attributions: VecDeque::new(),
            learning_rate: 0.01,
            clip: 0.1,
            fitness_rate: 0.1,
            window: 10,
        }
    }

    pub fn dims(&self) -> usize {
        self.fitness.len()
    }

    pub fn fitness(&self) -> &[f64] {
        &self.fitness
    }

    pub fn meta_rates(&self) -> &[f64] {
        &self.meta_rates
    }

    pub fn session_count(&self) -> u64 {
        self.session_count
    }

    pub fn recent_attributions(&self) -> &VecDeque<Vec<f64>> {
        &self.recent_attributions
    }

    /// Restore persisted fields; rates are *assigned*, never composed,
    /// so repeated save/load cycles cannot drift them toward the bound.
    pub fn restore(
        &mut self,
        fitness: Option<Vec<f64>>,
        meta_rates: Option<Vec<f64>>,
        session_count: u64,
        attributions: Vec<Vec<f64>>,
    ) {
        let n = self.dims();
        if let Some(f) = fitness {
            if f.len() == n {
                self.fitness = f;
            }
        }
        if let Some(r) = meta_rates {
            if r.len() == n {
                self.meta_rates = r
                    .iter()
                    .map(|&x| crate::utils::numerics::safe_clamp(x, RATE_MIN, RATE_MAX, 1.0))
                    .collect();
            }
        }
        self.session_count = session_count;
        self.recent_attributions = attributions
            .into_iter()
            .filter(|a| a.len() == n)
            .collect();
        while self.recent_attributions.len() > self.window {
            self.recent_attributions.pop_front();
        }
    }

    /// Direct assignment used by consolidated initialization.
    pub fn assign_meta_rates(&mut self, rates: Vec<f64>) {
        if rates.len() == self.dims() {
            self.meta_rates = rates
                .iter()
                .map(|&x| crate::utils::numerics::safe_clamp(x, RATE_MIN, RATE_MAX, 1.0))
                .collect();
        }
    }

    pub fn assign_fitness(&mut self, fitness: Vec<f64>) {
        if fitness.len() == self.dims() {
            self.fitness = crate::utils::numerics::sanitize_vec(&fitness, 0.0);
        }
    }

    /// Compute and apply the session's weight delta.
    ///
    /// `gradients`/`hessian_diag` come from the forward pass; `shapley`
    /// is the (possibly blended) attribution; `r_adj` scales the outcome
    /// force. Any non-finite component leaves its index unchanged.
    pub fn step(
        &mut self,
        weights: &mut [f64],
        gradients: &[f64],
        hessian_diag: &[f64],
        shapley: &[f64],
        r_adj: f64,
    ) -> WeightUpdate {
        let n = self.dims();
        let f_bar = mean(&self.fitness);
        let mut energy_term = vec![0.0; n];
        let mut outcome_term = vec![0.0; n];
        let mut replicator_term = vec![0.0; n];
        let mut delta = vec![0.0; n];

        for i in 0..n {
            let g = gradients.get(i).copied().unwrap_or(0.0);
            let h = hessian_diag.get(i).copied().unwrap_or(0.0);
            // Second-order step sizing wherever the local curvature is
            // trustworthy (positive); plain gradient descent otherwise.
            energy_term[i] = if h > 1e-6 {
                -self.learning_rate * g / h
            } else {
                -self.learning_rate * g
            };
            outcome_term[i] =
                r_adj * shapley.get(i).copied().unwrap_or(0.0) * self.meta_rates[i];
            replicator_term[i] = weights.get(i).copied().unwrap_or(0.0)
                * (self.fitness[i] - f_bar);

            let d = energy_term[i] + outcome_term[i] + replicator_term[i];
            if d.is_finite() {
                delta[i] = d.clamp(-self.clip, self.clip);
            }
        }

        for i in 0..n.min(weights.len()) {
            weights[i] = safe_finite(weights[i] + delta[i], weights[i])
                .clamp(MIN_WEIGHT, MAX_WEIGHT);
        }
        self.session_count += 1;

        WeightUpdate {
            delta,
            energy_term,
            outcome_term,
            replicator_term,
        }
    }

    /// Fitness EMA over the raw outcome (not the baseline-adjusted one):
    /// fitness ← (1−β)·fitness + β·R·|φ|.
    pub fn update_fitness(&mut self, r_raw: f64, shapley: &[f64]) {
        let r = safe_finite(r_raw, 0.0);
        for i in 0..self.dims() {
            let phi = shapley.get(i).copied().unwrap_or(0.0).abs();
            let next = (1.0 - self.fitness_rate) * self.fitness[i]
                + self.fitness_rate * r * phi;
            self.fitness[i] = safe_finite(next, self.fitness[i]);
        }
    }

    /// Record attributions and re-derive meta rates from their variance
    /// over the rolling window. High variance → explore (higher rate).
    pub fn update_meta_rates(&mut self, attributions: &[f64]) {
        let n = self.dims();
        if attributions.len() != n {
            return;
        }
        if self.recent_attributions.len() >= self.window {
            self.recent_attributions.pop_front();
        }
        self.recent_attributions
            .push_back(crate::utils::numerics::sanitize_vec(attributions, 0.0));

        if self.recent_attributions.len() < 2 {
            return;
        }
        let variances: Vec<f64> = (0..n)
            .map(|i| {
                let series: Vec<f64> = self
                    .recent_attributions
                    .iter()
                    .map(|a| a[i])
                    .collect();
                variance(&series)
            })
            .collect();
        let lo = variances.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = variances.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let span = hi - lo;
        for i in 0..n {
            let norm = if span > 1e-12 {
                (variances[i] - lo) / span
            } else {
                0.5
            };
            self.meta_rates[i] = (RATE_MIN + (RATE_MAX - RATE_MIN) * norm)
                .clamp(RATE_MIN, RATE_MAX);
        }
        debug!(
            "[Replicator] meta rates refreshed from {} attribution rows",
            self.recent_attributions.len()
        );
    }
}
