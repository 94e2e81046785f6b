//! Mode observation and the adaptive barrier.
//!
//! Classifies each session as search (high gradient far from the best
//! energy seen) or insight (settled), places every dimension in its well,
//! estimates quench-tunneling probability from recent outcome-force
//! noise, and lowers the double-well barrier as expertise grows.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::dynamics::energy::{potential, potential_curvature, EnergyGradient};
use crate::dynamics::{DynamicsParams, SelfState, Vocabulary};
use crate::utils::numerics::{safe_finite, variance};

pub const BARRIER_MIN: f64 = 0.25;
pub const BARRIER_MAX: f64 = 0.75;

const MODE_EPSILON: f64 = 1e-6;
const ENERGY_HISTORY_CAP: usize = 100;
const NOISE_WINDOW: usize = 10;
const TUNNEL_MIN_HISTORY: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Search,
    Insight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WellClass {
    Low,
    High,
    Barrier,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeReport {
    pub mode: Mode,
    pub mode_score: f64,
    pub wells: Vec<WellClass>,
    pub curvatures: Vec<f64>,
    /// Per-dimension probability that noise carries the weight across
    /// the barrier this session.
    pub tunneling: Vec<f64>,
    /// E(current) − E(uniform midpoint); negative means the evolved
    /// profile beats random.
    pub consolidation_delta: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeObserver {
    energy_history: VecDeque<f64>,
    outcome_noise: Vec<VecDeque<f64>>,
    session_count: u64,
    mode_threshold: f64,
    /// Half-width of the band around `a` classified as sitting on the
    /// barrier.
    barrier_band: f64,
}

impl ModeObserver {
    pub fn new(n: usize) -> Self {
        ModeObserver {
            energy_history: VecDeque::new(),
            outcome_noise: vec![VecDeque::new(); n],
            session_count: 0,
            mode_threshold: 1.0,
            barrier_band: 0.1,
        }
    }

    pub fn dims(&self) -> usize {
        self.outcome_noise.len()
    }

    pub fn session_count(&self) -> u64 {
        self.session_count
    }

    pub fn energy_history(&self) -> &VecDeque<f64> {
        &self.energy_history
    }

    /// Seed the energy history so the first session has a floor to
    /// measure against.
    pub fn seed(&mut self, energy: f64) {
        self.push_energy(energy);
    }

    fn push_energy(&mut self, energy: f64) {
        if self.energy_history.len() >= ENERGY_HISTORY_CAP {
            self.energy_history.pop_front();
        }
        self.energy_history.push_back(safe_finite(energy, 0.0));
    }

    pub(crate) fn restore(&mut self, energy: Vec<f64>, noise: Vec<Vec<f64>>, sessions: u64) {
        self.energy_history = energy.into_iter().collect();
        if noise.len() == self.dims() {
            self.outcome_noise = noise
                .into_iter()
                .map(|series| series.into_iter().collect())
                .collect();
        }
        self.session_count = sessions;
    }

    pub(crate) fn noise_history(&self) -> &[VecDeque<f64>] {
        &self.outcome_noise
    }

    /// Observe one session: gradient report plus the outcome-force
    /// vector the replicator applied.
    pub fn observe(
        &mut self,
        state: &SelfState,
        grad: &EnergyGradient,
        params: &DynamicsParams,
        vocab: &Vocabulary,
        outcome_terms: &[f64],
    ) -> ModeReport {
        let n = state.len();
        let energy = grad.energy;
        let e_min = self
            .energy_history
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min)
            .min(energy);

        let grad_sq = grad.norm().powi(2);
        let mode_score = safe_finite(grad_sq / (energy - e_min + MODE_EPSILON), f64::MAX);
        let mode = if mode_score >= self.mode_threshold {
            Mode::Search
        } else {
            Mode::Insight
        };

        // Record this session's noise before estimating variance so the
        // estimate includes the newest force.
        for i in 0..n.min(outcome_terms.len()) {
            let series = &mut self.outcome_noise[i];
            if series.len() >= NOISE_WINDOW {
                series.pop_front();
            }
            series.push_back(safe_finite(outcome_terms[i], 0.0));
        }

        let a = params.barrier;
        let mut wells = Vec::with_capacity(n);
        let mut curvatures = Vec::with_capacity(n);
        let mut tunneling = Vec::with_capacity(n);
        for i in 0..n {
            let w = state.weights[i];
            wells.push(if (w - a).abs() < self.barrier_band {
                WellClass::Barrier
            } else if w < a {
                WellClass::Low
            } else {
                WellClass::High
            });
            curvatures.push(potential_curvature(w, a));

            let series = &self.outcome_noise[i];
            let p = if series.len() < TUNNEL_MIN_HISTORY {
                0.0
            } else {
                let sigma_sq = variance(&series.iter().cloned().collect::<Vec<_>>());
                let barrier_height = (potential(a, a) - potential(w, a)).max(1e-6);
                1.0 - (-sigma_sq / (2.0 * barrier_height)).exp()
            };
            tunneling.push(safe_finite(p, 0.0).clamp(0.0, 1.0));
        }

        let midpoint = SelfState::uniform(n, 0.5);
        let consolidation_delta =
            energy - crate::dynamics::energy::energy(&midpoint, params, vocab);

        self.push_energy(energy);
        self.session_count += 1;

        ModeReport {
            mode,
            mode_score,
            wells,
            curvatures,
            tunneling,
            consolidation_delta,
        }
    }
}

/// Barrier height follows expertise: novices get tall stable wells,
/// experts a shallow barrier that re-learns fast.
pub fn adaptive_barrier(expertise: f64) -> f64 {
    let e = safe_finite(expertise, 0.0).clamp(0.0, 1.0);
    BARRIER_MAX - (BARRIER_MAX - BARRIER_MIN) * e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::energy::compute_energy_gradient;

    fn setup() -> (SelfState, DynamicsParams, Vocabulary) {
        let vocab = Vocabulary::fully_connected(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            0.2,
        )
        .unwrap();
        let state = SelfState::new(vec![0.1, 0.9, 0.3, 0.7], vec![0.2, 0.8, 0.4, 0.6]).unwrap();
        (state, DynamicsParams::balanced(4), vocab)
    }

    #[test]
    fn settled_state_reads_as_insight() {
        let (_, params, vocab) = setup();
        // near a well with no gradient: tiny numerator
        let state = SelfState::uniform(4, 0.5);
        let grad = compute_energy_gradient(&state, &params, &vocab);
        let mut obs = ModeObserver::new(4);
        obs.seed(grad.energy + 10.0);
        let report = obs.observe(&state, &grad, &params, &vocab, &[0.0; 4]);
        assert_eq!(report.mode, Mode::Insight);
    }

    #[test]
    fn steep_unexplored_state_reads_as_search() {
        let (state, params, vocab) = setup();
        let grad = compute_energy_gradient(&state, &params, &vocab);
        let mut obs = ModeObserver::new(4);
        obs.seed(grad.energy);
        let report = obs.observe(&state, &grad, &params, &vocab, &[0.0; 4]);
        // E == E_min, denominator collapses to ε
        assert_eq!(report.mode, Mode::Search);
        assert!(report.mode_score > 1.0);
    }

    #[test]
    fn wells_classify_by_distance_to_barrier() {
        let (state, params, vocab) = setup();
        let grad = compute_energy_gradient(&state, &params, &vocab);
        let mut obs = ModeObserver::new(4);
        obs.seed(grad.energy);
        let report = obs.observe(&state, &grad, &params, &vocab, &[0.0; 4]);
        assert_eq!(report.wells[0], WellClass::Low); // 0.1
        assert_eq!(report.wells[1], WellClass::High); // 0.9
        assert_eq!(report.wells[2], WellClass::Low); // 0.3
        assert_eq!(report.wells[3], WellClass::High); // 0.7
    }

    #[test]
    fn tunneling_needs_history_then_grows_with_noise() {
        let (state, params, vocab) = setup();
        let grad = compute_energy_gradient(&state, &params, &vocab);
        let mut obs = ModeObserver::new(4);
        obs.seed(grad.energy);

        let r1 = obs.observe(&state, &grad, &params, &vocab, &[0.5, 0.0, 0.0, 0.0]);
        assert!(r1.tunneling.iter().all(|p| *p == 0.0), "not enough history yet");
        obs.observe(&state, &grad, &params, &vocab, &[-0.5, 0.0, 0.0, 0.0]);
        let r3 = obs.observe(&state, &grad, &params, &vocab, &[0.5, 0.0, 0.0, 0.0]);
        assert!(r3.tunneling[0] > 0.5, "noisy dim should tunnel: {}", r3.tunneling[0]);
        assert!(r3.tunneling[1] < 1e-9, "quiet dim should not");
    }

    #[test]
    fn consolidation_negative_when_profile_beats_midpoint() {
        let (_, mut params, vocab) = setup();
        // weaken the homeostatic pull so the wells are the low ground
        params.homeostasis = 0.01;
        let state = SelfState::new(vec![0.05; 4], vec![0.05; 4]).unwrap();
        let grad = compute_energy_gradient(&state, &params, &vocab);
        let mut obs = ModeObserver::new(4);
        obs.seed(grad.energy);
        let report = obs.observe(&state, &grad, &params, &vocab, &[0.0; 4]);
        assert!(
            report.consolidation_delta < 0.0,
            "evolved profile should beat the midpoint: {}",
            report.consolidation_delta
        );
    }

    #[test]
    fn barrier_tracks_expertise() {
        assert_eq!(adaptive_barrier(0.0), BARRIER_MAX);
        assert_eq!(adaptive_barrier(1.0), BARRIER_MIN);
        let mid = adaptive_barrier(0.5);
        assert!((mid - 0.5).abs() < 1e-12);
        assert_eq!(adaptive_barrier(f64::NAN), BARRIER_MAX);
    }
}
