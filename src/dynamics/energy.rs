//! Double-well energy on the vocabulary graph.
//!
//! E(w, m) = (D/2)·wᵀLw + Σ V(w[i]) + (λ/2)·‖w − w*‖² + (κ/2)·‖w − m‖²
//! with V(u) = u⁴/4 − (1+a)u³/3 + a·u²/2, wells near 0 and 1 and the
//! barrier at u = a.

use serde::{Deserialize, Serialize};

use super::{DynamicsParams, SelfState, Vocabulary};
use crate::utils::numerics::safe_finite;

/// Intermediates are clamped before entering the quartic so extreme
/// weights cannot overflow the polynomial.
const POLY_BOUND: f64 = 1e3;

/// Double-well potential V(u).
pub fn potential(u: f64, a: f64) -> f64 {
    let u = safe_finite(u, 0.5).clamp(-POLY_BOUND, POLY_BOUND);
    u.powi(4) / 4.0 - (1.0 + a) * u.powi(3) / 3.0 + a * u * u / 2.0
}

/// V'(u) = u(u − 1)(u − a).
pub fn potential_grad(u: f64, a: f64) -> f64 {
    let u = safe_finite(u, 0.5).clamp(-POLY_BOUND, POLY_BOUND);
    u * (u - 1.0) * (u - a)
}

/// V''(u) = 3u² − 2(1+a)u + a. Negative between the wells, positive in them.
pub fn potential_curvature(u: f64, a: f64) -> f64 {
    let u = safe_finite(u, 0.5).clamp(-POLY_BOUND, POLY_BOUND);
    3.0 * u * u - 2.0 * (1.0 + a) * u + a
}

/// Total energy of a state.
pub fn energy(state: &SelfState, params: &DynamicsParams, vocab: &Vocabulary) -> f64 {
    let n = state.len();
    if n == 0 {
        return 0.0;
    }
    let lw = vocab.laplacian_apply(&state.weights);
    let diffusion: f64 = state
        .weights
        .iter()
        .zip(&lw)
        .map(|(w, l)| w * l)
        .sum::<f64>()
        * params.diffusion
        / 2.0;

    let mut well = 0.0;
    let mut homeo = 0.0;
    let mut coher = 0.0;
    for i in 0..n {
        let w = state.weights[i];
        well += potential(w, params.barrier);
        let dt = w - params.target.get(i).copied().unwrap_or(0.5);
        homeo += dt * dt;
        let dm = w - state.self_model[i];
        coher += dm * dm;
    }
    let total = diffusion
        + well
        + params.homeostasis / 2.0 * homeo
        + params.coherence / 2.0 * coher;
    safe_finite(total, 0.0)
}

/// The four additive pieces of ∂E/∂w. They sum to the total gradient
/// exactly; the component-sum identity is pinned by a test.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientComponents {
    pub diffusion: Vec<f64>,
    pub potential: Vec<f64>,
    pub homeostatic: Vec<f64>,
    pub coherence: Vec<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnergyGradient {
    pub gradients: Vec<f64>,
    pub energy: f64,
    pub components: GradientComponents,
    /// ∂²E/∂w[i]² = D·L[i,i] + V''(w[i]) + λ + κ
    pub hessian_diag: Vec<f64>,
    pub stability: StabilityReport,
}

impl EnergyGradient {
    /// ‖∇E‖₂
    pub fn norm(&self) -> f64 {
        crate::utils::numerics::norm(&self.gradients)
    }
}

/// Gershgorin disk verdict for a Jacobian.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StabilityReport {
    pub stable: bool,
    /// Diagonal entries (disk centers), one per row.
    pub centers: Vec<f64>,
}

/// Gradient, energy, per-component breakdown, Hessian diagonal and a
/// stability verdict in one pass.
pub fn compute_energy_gradient(
    state: &SelfState,
    params: &DynamicsParams,
    vocab: &Vocabulary,
) -> EnergyGradient {
    let n = state.len();
    if n == 0 {
        return EnergyGradient {
            gradients: vec![],
            energy: 0.0,
            components: GradientComponents {
                diffusion: vec![],
                potential: vec![],
                homeostatic: vec![],
                coherence: vec![],
            },
            hessian_diag: vec![],
            stability: StabilityReport {
                stable: true,
                centers: vec![],
            },
        };
    }

    let lw = vocab.laplacian_apply(&state.weights);
    let mut diffusion = vec![0.0; n];
    let mut well = vec![0.0; n];
    let mut homeo = vec![0.0; n];
    let mut coher = vec![0.0; n];
    let mut gradients = vec![0.0; n];
    let mut hessian_diag = vec![0.0; n];

    for i in 0..n {
        let w = state.weights[i];
        diffusion[i] = params.diffusion * lw[i];
        well[i] = potential_grad(w, params.barrier);
        homeo[i] = params.homeostasis * (w - params.target.get(i).copied().unwrap_or(0.5));
        coher[i] = params.coherence * (w - state.self_model[i]);
        gradients[i] = safe_finite(diffusion[i] + well[i] + homeo[i] + coher[i], 0.0);
        hessian_diag[i] = safe_finite(
            params.diffusion * vocab.degree(i)
                + potential_curvature(w, params.barrier)
                + params.homeostasis
                + params.coherence,
            0.0,
        );
    }

    let jac = jacobian(state, params, vocab);
    let stability = check_stability(&jac, 2 * n);

    EnergyGradient {
        gradients,
        energy: energy(state, params, vocab),
        components: GradientComponents {
            diffusion,
            potential: well,
            homeostatic: homeo,
            coherence: coher,
        },
        hessian_diag,
        stability,
    }
}

/// Jacobian of the coupled (w, m) flow, row-major 2N×2N.
///
/// dw/dt = −∂E/∂w couples w to itself through −(D·L + diag(V'') + λ + κ)
/// and to m through +κ; dm/dt = (κ+μ)(w − m) is linear.
pub fn jacobian(state: &SelfState, params: &DynamicsParams, vocab: &Vocabulary) -> Vec<f64> {
    let n = state.len();
    let dim = 2 * n;
    let mut j = vec![0.0; dim * dim];
    let relax = params.coherence + params.momentum;
    for i in 0..n {
        for k in 0..n {
            let l_ik = if i == k {
                vocab.degree(i)
            } else {
                -vocab.coupling(i, k)
            };
            let mut v = -params.diffusion * l_ik;
            if i == k {
                v -= potential_curvature(state.weights[i], params.barrier)
                    + params.homeostasis
                    + params.coherence;
            }
            j[i * dim + k] = v;
        }
        // ∂(dw_i)/∂m_i and the m rows
        j[i * dim + (n + i)] = params.coherence;
        j[(n + i) * dim + i] = relax;
        j[(n + i) * dim + (n + i)] = -relax;
    }
    j
}

/// Gershgorin disks in the left half-plane.
///
/// Stable iff every row satisfies center + radius ≤ tolerance; the m-rows
/// of the coupled system sit exactly on the imaginary axis, so marginal
/// rows count as stable.
pub fn check_stability(jac: &[f64], dim: usize) -> StabilityReport {
    const TOL: f64 = 1e-9;
    let mut centers = Vec::with_capacity(dim);
    let mut stable = true;
    for i in 0..dim {
        let center = jac[i * dim + i];
        let radius: f64 = (0..dim)
            .filter(|&j| j != i)
            .map(|j| jac[i * dim + j].abs())
            .sum();
        if center + radius > TOL {
            stable = false;
        }
        centers.push(center);
    }
    StabilityReport { stable, centers }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab4() -> Vocabulary {
        Vocabulary::fully_connected(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            0.2,
        )
        .unwrap()
    }

    fn state4() -> SelfState {
        SelfState::new(vec![0.1, 0.9, 0.3, 0.7], vec![0.2, 0.8, 0.4, 0.6]).unwrap()
    }

    #[test]
    fn wells_sit_at_zero_and_one() {
        let a = 0.5;
        assert!(potential_grad(0.0, a).abs() < 1e-12);
        assert!(potential_grad(1.0, a).abs() < 1e-12);
        assert!(potential_grad(a, a).abs() < 1e-12);
        // Barrier is a local max of V
        assert!(potential(a, a) > potential(0.0, a));
        assert!(potential(a, a) > potential(1.0, a));
    }

    #[test]
    fn components_sum_to_gradient() {
        let g = compute_energy_gradient(&state4(), &DynamicsParams::balanced(4), &vocab4());
        for i in 0..4 {
            let sum = g.components.diffusion[i]
                + g.components.potential[i]
                + g.components.homeostatic[i]
                + g.components.coherence[i];
            assert!(
                (sum - g.gradients[i]).abs() < f64::EPSILON * 8.0,
                "component sum {} != gradient {}",
                sum,
                g.gradients[i]
            );
        }
    }

    #[test]
    fn hessian_diagonal_formula() {
        let params = DynamicsParams::balanced(4);
        let vocab = vocab4();
        let g = compute_energy_gradient(&state4(), &params, &vocab);
        for i in 0..4 {
            let expected = params.diffusion * vocab.degree(i)
                + potential_curvature(state4().weights[i], params.barrier)
                + params.homeostasis
                + params.coherence;
            assert!((g.hessian_diag[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_vocabulary_is_trivially_stable() {
        let vocab = Vocabulary::new(vec![], vec![]).unwrap();
        let state = SelfState::uniform(0, 0.5);
        let g = compute_energy_gradient(&state, &DynamicsParams::balanced(0), &vocab);
        assert!(g.gradients.is_empty());
        assert_eq!(g.energy, 0.0);
        assert!(g.stability.stable);
    }

    #[test]
    fn extreme_weights_stay_finite() {
        let mut state = state4();
        state.weights = vec![1e9, -1e9, f64::MAX, 0.5];
        let g = compute_energy_gradient(&state, &DynamicsParams::balanced(4), &vocab4());
        assert!(g.energy.is_finite());
        assert!(g.gradients.iter().all(|x| x.is_finite()));
        assert!(g.hessian_diag.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn stability_flips_with_homeostasis() {
        // At the w = 0.5 equilibrium the Gershgorin bound reduces to
        // λ > a(1 − a) = 0.25.
        let vocab = vocab4();
        let state = SelfState::uniform(4, 0.5);
        let mut params = DynamicsParams::balanced(4);

        params.homeostasis = 0.4;
        let jac = jacobian(&state, &params, &vocab);
        assert!(check_stability(&jac, 8).stable);

        params.homeostasis = 0.1;
        let jac = jacobian(&state, &params, &vocab);
        assert!(!check_stability(&jac, 8).stable);
    }
}
