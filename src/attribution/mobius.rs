//! Learned Möbius characteristic function.
//!
//! Maintains a sparse set function v(S) = Σ_{T⊆S} m(T) fitted online to
//! observed (activation mask, outcome) pairs with an L1 penalty. Möbius
//! inversion turns the coefficients directly into Shapley values
//! (φ[i] = Σ_{T∋i} m(T)/|T|), which capture pairwise-and-higher synergies
//! the additive allocator misses. The blend weight ramps with the number
//! of observations so the learned function only takes over once it has
//! data behind it.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::utils::numerics::{safe_divide, safe_finite};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobiusObservation {
    pub mask: u32,
    pub outcome: f64,
    pub session_index: u64,
}

/// Diagnostics surfaced to guidance and the status report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobiusDiagnostics {
    pub observations: usize,
    pub residual: f64,
    pub order: usize,
    /// Dimensions and |coefficient| of the strongest learned interaction.
    pub strongest_interaction: Option<(Vec<usize>, f64)>,
    pub data_adequate: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MobiusCharacteristic {
    n: usize,
    observations: VecDeque<MobiusObservation>,
    /// Möbius coefficients m(T), keyed by subset mask. ∅ is the intercept.
    coefficients: HashMap<u32, f64>,
    max_order: usize,
    residual: f64,
    // Tuning — kept on the state so persisted profiles refit consistently.
    capacity: usize,
    activation_epsilon: f64,
    min_observations: usize,
    promotion_threshold: usize,
    promotion_residual: f64,
    lasso_lambda: f64,
}

impl MobiusCharacteristic {
    pub fn new(n: usize) -> Self {
        MobiusCharacteristic {
            n,
            observations: VecDeque::new(),
            coefficients: HashMap::new(),
            max_order: 2,
            residual: 0.0,
            capacity: 200,
            activation_epsilon: 0.05,
            min_observations: 20,
            promotion_threshold: 25,
            promotion_residual: 0.5,
            lasso_lambda: 0.01,
        }
    }

    pub fn dims(&self) -> usize {
        self.n
    }

    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn order(&self) -> usize {
        self.max_order
    }

    pub fn residual(&self) -> f64 {
        self.residual
    }

    /// Bit i set iff the weight moved at least ε away from its baseline.
    pub fn activation_mask(&self, weights: &[f64], baseline: &[f64]) -> u32 {
        let mut mask = 0u32;
        for i in 0..self.n.min(weights.len()).min(baseline.len()) {
            if (weights[i] - baseline[i]).abs() >= self.activation_epsilon {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Record one session observation and refit.
    pub fn observe(&mut self, weights: &[f64], baseline: &[f64], outcome: f64, session: u64) {
        let mask = self.activation_mask(weights, baseline);
        self.observe_mask(mask, outcome, session);
    }

    pub fn observe_mask(&mut self, mask: u32, outcome: f64, session: u64) {
        if self.observations.len() >= self.capacity {
            self.observations.pop_front();
        }
        self.observations.push_back(MobiusObservation {
            mask,
            outcome: safe_finite(outcome, 0.0),
            session_index: session,
        });
        self.refit();
        self.maybe_promote();
    }

    /// v(S) = Σ_{T⊆S} m(T)
    pub fn value(&self, mask: u32) -> f64 {
        self.coefficients
            .iter()
            .filter(|(t, _)| **t & mask == **t)
            .map(|(_, m)| m)
            .sum()
    }

    /// v(full) − v(∅): the learned worth of the grand coalition.
    pub fn grand_value(&self) -> f64 {
        self.coefficients
            .iter()
            .filter(|(t, _)| **t != 0)
            .map(|(_, m)| m)
            .sum()
    }

    /// Shapley values by Möbius inversion.
    pub fn shapley(&self) -> Vec<f64> {
        let mut phi = vec![0.0; self.n];
        for (&t, &m) in &self.coefficients {
            if t == 0 {
                continue;
            }
            let size = t.count_ones() as f64;
            for (i, p) in phi.iter_mut().enumerate() {
                if t & (1 << i) != 0 {
                    *p += m / size;
                }
            }
        }
        phi
    }

    /// Blend weight of the learned function against the additive
    /// allocator: 0 below `min_observations`, 1 at twice that.
    pub fn blend_alpha(&self) -> f64 {
        let o = self.observations.len() as f64;
        let o_min = self.min_observations as f64;
        ((o - o_min) / o_min).clamp(0.0, 1.0)
    }

    pub fn diagnostics(&self) -> MobiusDiagnostics {
        let strongest = self
            .coefficients
            .iter()
            .filter(|(t, _)| t.count_ones() >= 2)
            .max_by(|a, b| {
                a.1.abs()
                    .partial_cmp(&b.1.abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(&t, &m)| {
                let dims: Vec<usize> = (0..self.n).filter(|i| t & (1 << i) != 0).collect();
                (dims, m.abs())
            });
        MobiusDiagnostics {
            observations: self.observations.len(),
            residual: self.residual,
            order: self.max_order,
            strongest_interaction: strongest,
            data_adequate: self.observations.len() >= self.min_observations,
        }
    }

    /// Candidate subsets: every non-empty T with |T| ≤ max_order that is
    /// contained in at least one observed mask, plus the ∅ intercept.
    fn candidate_subsets(&self) -> Vec<u32> {
        let mut seen: HashSet<u32> = HashSet::new();
        seen.insert(0);
        for obs in &self.observations {
            collect_subsets(obs.mask, self.max_order, &mut seen);
        }
        let mut out: Vec<u32> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// LASSO by cyclic coordinate descent on the subset-indicator design.
    fn refit(&mut self) {
        let obs: Vec<(u32, f64)> = self
            .observations
            .iter()
            .map(|o| (o.mask, o.outcome))
            .collect();
        if obs.is_empty() {
            self.coefficients.clear();
            self.residual = 0.0;
            return;
        }

        let features = self.candidate_subsets();
        let mut coef: HashMap<u32, f64> = features
            .iter()
            .map(|&t| (t, self.coefficients.get(&t).copied().unwrap_or(0.0)))
            .collect();

        // residual vector r = y − X m for the warm start
        let mut r: Vec<f64> = obs
            .iter()
            .map(|&(mask, y)| {
                let pred: f64 = coef
                    .iter()
                    .filter(|(t, _)| **t & mask == **t)
                    .map(|(_, m)| m)
                    .sum();
                y - pred
            })
            .collect();

        let penalty = self.lasso_lambda * obs.len() as f64;
        for _ in 0..50 {
            let mut max_change: f64 = 0.0;
            for &t in &features {
                let old = coef[&t];
                let mut rho = 0.0;
                let mut z = 0.0;
                for (k, &(mask, _)) in obs.iter().enumerate() {
                    if t & mask == t {
                        rho += r[k] + old;
                        z += 1.0;
                    }
                }
                if z == 0.0 {
                    continue;
                }
                // Intercept stays unpenalized.
                let new = if t == 0 {
                    rho / z
                } else {
                    soft_threshold(rho, penalty) / z
                };
                if new != old {
                    for (k, &(mask, _)) in obs.iter().enumerate() {
                        if t & mask == t {
                            r[k] -= new - old;
                        }
                    }
                    coef.insert(t, new);
                    max_change = max_change.max((new - old).abs());
                }
            }
            if max_change < 1e-7 {
                break;
            }
        }

        coef.retain(|&t, m| t == 0 || m.abs() > 1e-9);
        self.coefficients = coef;

        let rmse = (r.iter().map(|e| e * e).sum::<f64>() / obs.len() as f64).sqrt();
        let spread = crate::utils::numerics::variance(
            &obs.iter().map(|&(_, y)| y).collect::<Vec<_>>(),
        )
        .sqrt();
        self.residual = safe_divide(rmse, spread + 1e-6, 0.0);
    }

    /// Promote the interaction order when the fit keeps missing and there
    /// is enough data to support the larger feature set. The residual
    /// target (0.5) is a heuristic, not a theorem.
    fn maybe_promote(&mut self) {
        let cap = 4usize.min(self.n.max(1));
        if self.max_order < cap
            && self.observations.len() >= self.promotion_threshold
            && self.residual > self.promotion_residual
        {
            self.max_order += 1;
            tracing::info!(
                "[Mobius] residual {:.3} above target, promoting interaction order to {}",
                self.residual,
                self.max_order
            );
            self.refit();
        }
    }
}

fn soft_threshold(x: f64, penalty: f64) -> f64 {
    if x > penalty {
        x - penalty
    } else if x < -penalty {
        x + penalty
    } else {
        0.0
    }
}

/// All non-empty subsets of `mask` with at most `max_order` bits.
fn collect_subsets(mask: u32, max_order: usize, out: &mut HashSet<u32>) {
    let bits: Vec<u32> = (0..32).filter(|b| mask & (1 << b) != 0).collect();
    let p = bits.len();
    // Enumerate index combinations up to the order cap.
    let mut stack: Vec<(usize, u32, usize)> = vec![(0, 0, 0)];
    while let Some((start, subset, size)) = stack.pop() {
        if size > 0 {
            out.insert(subset);
        }
        if size == max_order {
            continue;
        }
        for idx in start..p {
            stack.push((idx + 1, subset | (1 << bits[idx]), size + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_uses_activation_epsilon() {
        let m = MobiusCharacteristic::new(4);
        let baseline = vec![0.5; 4];
        let weights = vec![0.56, 0.5, 0.449, 0.46];
        assert_eq!(m.activation_mask(&weights, &baseline), 0b0101);
    }

    #[test]
    fn blend_alpha_ramps_with_observations() {
        let mut m = MobiusCharacteristic::new(2);
        assert_eq!(m.blend_alpha(), 0.0);
        for k in 0..19 {
            m.observe_mask(0b01, 0.5, k);
        }
        assert_eq!(m.blend_alpha(), 0.0, "below O_min must not blend");
        m.observe_mask(0b01, 0.5, 19);
        assert_eq!(m.blend_alpha(), 0.0);
        for k in 20..40 {
            m.observe_mask(0b10, 0.4, k);
        }
        assert_eq!(m.blend_alpha(), 1.0, "at 2·O_min the learned side wins");
    }

    #[test]
    fn learns_a_pairwise_synergy() {
        let mut m = MobiusCharacteristic::new(4);
        for k in 0..10 {
            m.observe_mask(0b0001, 0.3, k);
        }
        for k in 10..20 {
            m.observe_mask(0b0010, 0.3, k);
        }
        for k in 20..30 {
            m.observe_mask(0b0011, 0.9, k);
        }
        assert!((m.value(0b0001) - 0.3).abs() < 0.1, "v({{0}}) = {}", m.value(0b0001));
        assert!((m.value(0b0011) - 0.9).abs() < 0.1, "v({{0,1}}) = {}", m.value(0b0011));

        // The synergy shows up as a positive pair coefficient, and the
        // inverted Shapley splits it between the two participants.
        let diag = m.diagnostics();
        let (dims, strength) = diag.strongest_interaction.expect("interaction learned");
        assert_eq!(dims, vec![0, 1]);
        assert!(strength > 0.1);
        let phi = m.shapley();
        assert!(phi[0] > 0.25 && phi[1] > 0.25);
        assert!(phi[2].abs() < 1e-6 && phi[3].abs() < 1e-6);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut m = MobiusCharacteristic::new(3);
        for k in 0..500 {
            m.observe_mask((k % 7) as u32 + 1, 0.1, k as u64);
        }
        assert!(m.observation_count() <= 200);
    }

    #[test]
    fn non_finite_outcome_is_coerced() {
        let mut m = MobiusCharacteristic::new(2);
        m.observe_mask(0b11, f64::NAN, 0);
        assert!(m.value(0b11).is_finite());
        assert!(m.residual().is_finite());
    }

    #[test]
    fn subset_collection_honors_order_cap() {
        let mut out = HashSet::new();
        collect_subsets(0b1111, 2, &mut out);
        // 4 singletons + 6 pairs
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|t| t.count_ones() <= 2));
    }
}
