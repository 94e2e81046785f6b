//! Session snapshots and consolidated re-initialization.
//!
//! A short ring of end-of-session snapshots survives restarts. On load,
//! weights re-initialize as a softmax-over-outcome average of the
//! snapshots, fitness gets a uniform noise floor, and meta-learning
//! rates are *assigned* from attribution consistency — assignment, not
//! multiplication, so repeated reloads cannot drift them to the bound.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::dynamics::{MAX_WEIGHT, MIN_WEIGHT};
use crate::learning::replicator::{RATE_MAX, RATE_MIN};
use crate::utils::numerics::{safe_clamp, safe_finite};

pub const SNAPSHOT_CAPACITY: usize = 5;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub weights: Vec<f64>,
    pub fitness: Vec<f64>,
    pub outcome: f64,
    pub hessian_diag: Vec<f64>,
    pub attributions: Vec<f64>,
    pub expertise: f64,
    pub timestamp: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotRing {
    snapshots: VecDeque<Snapshot>,
}

impl SnapshotRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        if self.snapshots.len() >= SNAPSHOT_CAPACITY {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn restore(snapshots: Vec<Snapshot>) -> Self {
        let mut ring = SnapshotRing::new();
        for s in snapshots {
            ring.push(s);
        }
        ring
    }

    pub fn to_vec(&self) -> Vec<Snapshot> {
        self.snapshots.iter().cloned().collect()
    }
}

/// The consolidated starting point derived from recent snapshots.
#[derive(Clone, Debug)]
pub struct ConsolidatedInit {
    pub weights: Vec<f64>,
    pub fitness: Vec<f64>,
    pub meta_rates: Vec<f64>,
}

/// Softmax temperature over snapshot outcomes.
const TAU: f64 = 1.0;
const CONSISTENCY_EPSILON: f64 = 1e-6;

/// Blend up to five snapshots into the reload state.
///
/// A single snapshot reduces to the identity on weights (modulo the
/// clamp); an empty ring yields None and the caller falls back to a
/// fresh profile.
pub fn consolidated_init(ring: &SnapshotRing, n: usize) -> Option<ConsolidatedInit> {
    let usable: Vec<&Snapshot> = ring
        .iter()
        .filter(|s| s.weights.len() == n && s.fitness.len() == n)
        .collect();
    if usable.is_empty() || n == 0 {
        return None;
    }

    // Max-subtracted softmax over outcomes for numeric stability.
    let max_r = usable
        .iter()
        .map(|s| safe_finite(s.outcome, 0.0))
        .fold(f64::NEG_INFINITY, f64::max);
    let raw: Vec<f64> = usable
        .iter()
        .map(|s| ((safe_finite(s.outcome, 0.0) - max_r) / TAU).exp())
        .collect();
    let total: f64 = raw.iter().sum();
    let probs: Vec<f64> = raw.iter().map(|x| x / total).collect();

    let mut weights = vec![0.0; n];
    let mut fitness_weighted = vec![0.0; n];
    for (k, snap) in usable.iter().enumerate() {
        for i in 0..n {
            weights[i] += probs[k] * snap.weights[i];
            fitness_weighted[i] += probs[k] * snap.fitness[i];
        }
    }
    for w in weights.iter_mut() {
        *w = safe_clamp(*w, MIN_WEIGHT, MAX_WEIGHT, 0.5);
    }

    // Uniform noise floor keeps a zero-fitness history alive.
    let floor = 1.0 / n as f64;
    let fitness: Vec<f64> = fitness_weighted
        .iter()
        .map(|f| safe_finite(0.8 * f + 0.2 * floor, floor))
        .collect();

    // Attribution consistency → assigned meta rates.
    let meta_rates = if usable.len() < 2 {
        vec![1.0; n]
    } else {
        let mut consistency = vec![0.0; n];
        for (i, c) in consistency.iter_mut().enumerate() {
            let series: Vec<f64> = usable
                .iter()
                .map(|s| s.attributions.get(i).copied().unwrap_or(0.0))
                .collect();
            *c = 1.0 / (crate::utils::numerics::variance(&series) + CONSISTENCY_EPSILON);
        }
        let lo = consistency.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = consistency.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let span = hi - lo;
        consistency
            .iter()
            .map(|&c| {
                let normalized = if span > 1e-12 { (c - lo) / span } else { 0.5 };
                safe_clamp(1.0 + 0.5 * (1.0 - normalized), RATE_MIN, RATE_MAX, 1.0)
            })
            .collect()
    };

    Some(ConsolidatedInit {
        weights,
        fitness,
        meta_rates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(weights: Vec<f64>, outcome: f64, attributions: Vec<f64>) -> Snapshot {
        let n = weights.len();
        Snapshot {
            weights,
            fitness: vec![0.2; n],
            outcome,
            hessian_diag: vec![0.5; n],
            attributions,
            expertise: 0.3,
            timestamp: 1700000000,
        }
    }

    #[test]
    fn ring_is_bounded_at_five() {
        let mut ring = SnapshotRing::new();
        for k in 0..9 {
            ring.push(snapshot(vec![0.5; 2], k as f64 / 10.0, vec![0.0; 2]));
        }
        assert_eq!(ring.len(), 5);
        assert!((ring.latest().unwrap().outcome - 0.8).abs() < 1e-12);
    }

    #[test]
    fn single_snapshot_is_identity_on_weights() {
        let mut ring = SnapshotRing::new();
        ring.push(snapshot(vec![0.3, 0.7], 0.5, vec![0.1, 0.2]));
        let init = consolidated_init(&ring, 2).unwrap();
        assert!((init.weights[0] - 0.3).abs() < 1e-12);
        assert!((init.weights[1] - 0.7).abs() < 1e-12);
        assert_eq!(init.meta_rates, vec![1.0, 1.0]);
    }

    #[test]
    fn better_outcomes_dominate_the_blend() {
        let mut ring = SnapshotRing::new();
        ring.push(snapshot(vec![0.2, 0.2], -1.0, vec![0.0, 0.0]));
        ring.push(snapshot(vec![0.8, 0.8], 1.0, vec![0.0, 0.0]));
        let init = consolidated_init(&ring, 2).unwrap();
        // softmax(1.0) ≈ 0.88 of the mass
        assert!(init.weights[0] > 0.7, "got {}", init.weights[0]);
    }

    #[test]
    fn zero_fitness_history_keeps_a_floor() {
        let mut ring = SnapshotRing::new();
        let mut s = snapshot(vec![0.5; 4], 0.0, vec![0.0; 4]);
        s.fitness = vec![0.0; 4];
        ring.push(s);
        let init = consolidated_init(&ring, 4).unwrap();
        for f in &init.fitness {
            assert!((f - 0.05).abs() < 1e-12); // 0.2 · 1/4
        }
    }

    #[test]
    fn consistent_dimension_exploits_noisy_explores() {
        let mut ring = SnapshotRing::new();
        // dim 0 attribution steady, dim 1 swings
        ring.push(snapshot(vec![0.5, 0.5], 0.2, vec![0.3, 0.8]));
        ring.push(snapshot(vec![0.5, 0.5], 0.2, vec![0.3, -0.8]));
        ring.push(snapshot(vec![0.5, 0.5], 0.2, vec![0.3, 0.6]));
        let init = consolidated_init(&ring, 2).unwrap();
        assert!(init.meta_rates[0] < init.meta_rates[1]);
        assert!((init.meta_rates[0] - 1.0).abs() < 1e-9, "steady dim exploits");
        assert!((init.meta_rates[1] - 1.5).abs() < 1e-9, "noisy dim explores");
    }

    #[test]
    fn mismatched_snapshots_are_skipped() {
        let mut ring = SnapshotRing::new();
        ring.push(snapshot(vec![0.5; 3], 0.1, vec![0.0; 3]));
        assert!(consolidated_init(&ring, 4).is_none());
    }
}
