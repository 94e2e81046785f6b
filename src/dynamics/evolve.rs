//! Forward evolution of the identity state.
//!
//! One explicit step of the gradient flow
//!   dw/dt = −∂E/∂w + σ·experience
//!   dm/dt = (κ + μ)·(w − m)
//! plus Picard iteration to a fixed point. With μ > κ/2 the step is
//! dissipative: energy never increases beyond numeric tolerance.

use serde::{Deserialize, Serialize};

use super::energy::{check_stability, compute_energy_gradient, energy, jacobian, StabilityReport};
use super::{DynamicsParams, SelfState, Vocabulary};
use crate::utils::numerics::safe_finite;

/// Outcome of a single evolve step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvolveResult {
    pub state: SelfState,
    pub energy_before: f64,
    pub energy_after: f64,
}

impl EvolveResult {
    /// Positive when the step descended.
    pub fn energy_drop(&self) -> f64 {
        self.energy_before - self.energy_after
    }
}

/// One explicit Euler step. `experience` is a per-dimension drive already
/// scaled by the caller's gain; pass an empty slice for pure relaxation.
pub fn evolve(
    state: &SelfState,
    experience: &[f64],
    params: &DynamicsParams,
    vocab: &Vocabulary,
    dt: f64,
) -> EvolveResult {
    let n = state.len();
    let energy_before = energy(state, params, vocab);
    if n == 0 {
        return EvolveResult {
            state: state.clone(),
            energy_before,
            energy_after: energy_before,
        };
    }

    let grad = compute_energy_gradient(state, params, vocab);
    let relax = params.coherence + params.momentum;
    let dt = safe_finite(dt, 0.0).max(0.0);

    let mut next = state.clone();
    for i in 0..n {
        let drive = experience.get(i).copied().unwrap_or(0.0);
        let dw = -grad.gradients[i] + safe_finite(drive, 0.0);
        let dm = relax * (state.weights[i] - state.self_model[i]);
        next.weights[i] = state.weights[i] + dt * dw;
        next.self_model[i] = state.self_model[i] + dt * dm;
    }
    next.clamp_in_place();
    next.time = state.time + dt;

    EvolveResult {
        energy_after: energy(&next, params, vocab),
        state: next,
        energy_before,
    }
}

/// Fixed point of the relaxation flow found by Picard iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FixedPoint {
    pub state: SelfState,
    pub converged: bool,
    pub iterations: usize,
    pub stability: StabilityReport,
}

/// Iterate the flow until ‖Δw‖ + ‖Δm‖ < tol or the cap is reached.
///
/// Convergence for all λ above the stability threshold is observed
/// empirically, not proved; callers must consult the `converged` flag.
pub fn find_fixed_point(
    start: &SelfState,
    params: &DynamicsParams,
    vocab: &Vocabulary,
    max_iter: usize,
    tol: f64,
) -> FixedPoint {
    const PICARD_DT: f64 = 0.1;

    let mut current = start.clone();
    let mut converged = false;
    let mut iterations = 0;

    for it in 0..max_iter {
        let next = evolve(&current, &[], params, vocab, PICARD_DT).state;
        let mut step = 0.0;
        for i in 0..current.len() {
            step += (next.weights[i] - current.weights[i]).abs()
                + (next.self_model[i] - current.self_model[i]).abs();
        }
        current = next;
        iterations = it + 1;
        if step < tol {
            converged = true;
            break;
        }
    }

    let jac = jacobian(&current, params, vocab);
    let stability = check_stability(&jac, 2 * current.len());

    FixedPoint {
        state: current,
        converged,
        iterations,
        stability,
    }
}
