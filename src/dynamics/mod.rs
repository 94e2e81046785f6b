//! Continuous identity state and its Lyapunov energy.
//!
//! The behavioral profile lives on a graph of assertions: a fixed
//! `Vocabulary` (names + coupling matrix), a `SelfState` (behavioral
//! weights `w` and self-model `m`), and `DynamicsParams` controlling the
//! double-well landscape the state descends.

pub mod chain;
pub mod energy;
pub mod evolve;

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, IdentityResult};

/// Hard cap on behavioral dimensions. Exact Shapley enumerates 2^N
/// coalitions, so the vocabulary refuses to grow past this.
pub const MAX_DIMENSIONS: usize = 16;

/// Weights live strictly inside the unit interval so the double-well
/// polynomial keeps both wells reachable.
pub const MIN_WEIGHT: f64 = 0.01;
pub const MAX_WEIGHT: f64 = 0.99;

/// Fixed behavioral assertion space: ordered names plus a symmetric
/// coupling matrix. Immutable for the agent's lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vocabulary {
    names: Vec<String>,
    /// Row-major N×N couplings in [0,1], zero diagonal.
    adjacency: Vec<f64>,
}

impl Vocabulary {
    pub fn new(names: Vec<String>, adjacency: Vec<f64>) -> IdentityResult<Self> {
        let n = names.len();
        if n > MAX_DIMENSIONS {
            return Err(IdentityError::TooManyDimensions {
                max: MAX_DIMENSIONS,
                got: n,
            });
        }
        if adjacency.len() != n * n {
            return Err(IdentityError::LengthMismatch {
                what: "vocabulary adjacency",
                left: adjacency.len(),
                right: n * n,
            });
        }
        let mut adjacency = crate::utils::numerics::sanitize_vec(&adjacency, 0.0);
        for i in 0..n {
            // Zero diagonal is required for Laplacian correctness; symmetrize
            // by averaging so callers can pass either triangle.
            adjacency[i * n + i] = 0.0;
            for j in (i + 1)..n {
                let avg = 0.5 * (adjacency[i * n + j] + adjacency[j * n + i]);
                let c = avg.clamp(0.0, 1.0);
                adjacency[i * n + j] = c;
                adjacency[j * n + i] = c;
            }
        }
        Ok(Vocabulary { names, adjacency })
    }

    /// Fully connected vocabulary with uniform coupling strength.
    pub fn fully_connected(names: Vec<String>, coupling: f64) -> IdentityResult<Self> {
        let n = names.len();
        let mut adjacency = vec![coupling.clamp(0.0, 1.0); n * n];
        for i in 0..n {
            adjacency[i * n + i] = 0.0;
        }
        Vocabulary::new(names, adjacency)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn name(&self, i: usize) -> &str {
        &self.names[i]
    }

    pub fn coupling(&self, i: usize, j: usize) -> f64 {
        self.adjacency[i * self.len() + j]
    }

    /// Weighted degree of node i (Laplacian diagonal).
    pub fn degree(&self, i: usize) -> f64 {
        let n = self.len();
        (0..n).map(|j| self.adjacency[i * n + j]).sum()
    }

    /// Graph Laplacian applied to a vector: (L x)[i] = deg(i)·x[i] − Σ A[i,j]·x[j].
    pub fn laplacian_apply(&self, x: &[f64]) -> Vec<f64> {
        let n = self.len();
        let mut out = vec![0.0; n];
        for i in 0..n {
            let mut acc = self.degree(i) * x[i];
            for j in 0..n {
                acc -= self.adjacency[i * n + j] * x[j];
            }
            out[i] = acc;
        }
        out
    }
}

/// The evolving continuous state: behavioral weights and self-model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelfState {
    pub weights: Vec<f64>,
    pub self_model: Vec<f64>,
    pub time: f64,
}

impl SelfState {
    pub fn new(weights: Vec<f64>, self_model: Vec<f64>) -> IdentityResult<Self> {
        if weights.len() != self_model.len() {
            return Err(IdentityError::LengthMismatch {
                what: "self state weights / self model",
                left: weights.len(),
                right: self_model.len(),
            });
        }
        let clamp = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .map(|&x| crate::utils::numerics::safe_clamp(x, MIN_WEIGHT, MAX_WEIGHT, 0.5))
                .collect()
        };
        Ok(SelfState {
            weights: clamp(&weights),
            self_model: clamp(&self_model),
            time: 0.0,
        })
    }

    /// Coherent genesis state at the given uniform weight.
    pub fn uniform(n: usize, value: f64) -> Self {
        let v = value.clamp(MIN_WEIGHT, MAX_WEIGHT);
        SelfState {
            weights: vec![v; n],
            self_model: vec![v; n],
            time: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// ‖w − m‖₂, the coherence gap. Small at fixed points.
    pub fn coherence_gap(&self) -> f64 {
        self.weights
            .iter()
            .zip(&self.self_model)
            .map(|(w, m)| (w - m) * (w - m))
            .sum::<f64>()
            .sqrt()
    }

    pub(crate) fn clamp_in_place(&mut self) {
        for w in self.weights.iter_mut() {
            *w = crate::utils::numerics::safe_clamp(*w, MIN_WEIGHT, MAX_WEIGHT, 0.5);
        }
        for m in self.self_model.iter_mut() {
            *m = crate::utils::numerics::safe_clamp(*m, MIN_WEIGHT, MAX_WEIGHT, 0.5);
        }
    }
}

/// Scalar parameters of the energy landscape.
///
/// Well-posedness requires `momentum > coherence / 2` (energy descent) and
/// `homeostasis > barrier·(1 − barrier)` (stability at the homeostatic
/// target; 0.25 when the barrier sits at 0.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DynamicsParams {
    /// D — diffusion strength along vocabulary couplings
    pub diffusion: f64,
    /// λ — pull toward the homeostatic target
    pub homeostasis: f64,
    /// μ — self-model momentum
    pub momentum: f64,
    /// κ — coherence coupling between w and m
    pub coherence: f64,
    /// a — barrier position of the double well, in [0,1]
    pub barrier: f64,
    /// w* — homeostatic target per dimension
    pub target: Vec<f64>,
}

impl DynamicsParams {
    pub fn balanced(n: usize) -> Self {
        DynamicsParams {
            diffusion: 0.1,
            homeostasis: 0.4,
            momentum: 0.3,
            coherence: 0.1,
            barrier: 0.5,
            target: vec![0.5; n],
        }
    }

    /// Energy-descent precondition of the evolve step.
    pub fn is_dissipative(&self) -> bool {
        self.momentum > self.coherence / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_rejects_too_many_dims() {
        let names: Vec<String> = (0..17).map(|i| format!("dim{}", i)).collect();
        let adj = vec![0.0; 17 * 17];
        assert!(matches!(
            Vocabulary::new(names, adj),
            Err(IdentityError::TooManyDimensions { .. })
        ));
    }

    #[test]
    fn vocabulary_zeroes_diagonal_and_symmetrizes() {
        let v = Vocabulary::new(
            vec!["a".into(), "b".into()],
            vec![0.9, 0.4, 0.2, 0.7],
        )
        .unwrap();
        assert_eq!(v.coupling(0, 0), 0.0);
        assert_eq!(v.coupling(1, 1), 0.0);
        assert!((v.coupling(0, 1) - 0.3).abs() < 1e-12);
        assert_eq!(v.coupling(0, 1), v.coupling(1, 0));
    }

    #[test]
    fn laplacian_annihilates_constants() {
        let v = Vocabulary::fully_connected(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            0.2,
        )
        .unwrap();
        let out = v.laplacian_apply(&[0.7; 4]);
        for x in out {
            assert!(x.abs() < 1e-12);
        }
    }

    #[test]
    fn state_clamps_to_bounds() {
        let s = SelfState::new(vec![-0.5, 1.5], vec![0.5, f64::NAN]).unwrap();
        assert_eq!(s.weights, vec![MIN_WEIGHT, MAX_WEIGHT]);
        assert_eq!(s.self_model[1], 0.5);
    }

    #[test]
    fn coherent_state_has_zero_gap() {
        let s = SelfState::uniform(4, 0.5);
        assert_eq!(s.coherence_gap(), 0.0);
    }
}
