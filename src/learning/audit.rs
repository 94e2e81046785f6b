//! Signal audit log.
//!
//! A bounded ring of per-session snapshots connecting signals →
//! gradients → weight deltas, built in two phases inside the backward
//! pass. Phase 1 captures the pre-gradient view (including the
//! session-start weights taken *before* the forward pass — the value
//! snapshot that defeats aliased-state attribution); phase 2 extends the
//! same entry with the applied update. A session aborted between phases
//! leaves no partial entry behind.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::outcome::SessionSignal;
use super::replicator::WeightUpdate;

const AUDIT_CAPACITY: usize = 20;

/// Gradient components as applied by the replicator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GradientBreakdown {
    pub energy: Vec<f64>,
    pub outcome: Vec<f64>,
    pub replicator: Vec<f64>,
}

/// One complete two-phase snapshot. Always stored and handed out by
/// value so serialization never aliases live state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignalSnapshot {
    // Phase 1 — before the backward gradient
    pub session_index: u64,
    pub timestamp: i64,
    pub r: f64,
    pub r_adj: f64,
    pub signals: Vec<SessionSignal>,
    /// Weights as they were before the forward pass touched the bridge.
    pub weights_session_start: Vec<f64>,
    /// Weights after the forward pass, before the backward pass.
    pub weights_before: Vec<f64>,
    pub meta_learning_rates: Vec<f64>,

    // Phase 2 — after the gradient is applied
    pub weights_after: Vec<f64>,
    pub delta_w: Vec<f64>,
    pub gradients: GradientBreakdown,
    pub attributions: Vec<f64>,
    pub fitness: Vec<f64>,
    pub blend_alpha: Option<f64>,
    /// v_learned(N) − v_learned(∅) at snapshot time.
    pub mobius_v: Option<f64>,
}

/// Phase-1 payload held until the session commits.
#[derive(Clone, Debug)]
pub struct PendingSnapshot {
    pub session_index: u64,
    pub timestamp: i64,
    pub r: f64,
    pub r_adj: f64,
    pub signals: Vec<SessionSignal>,
    pub weights_session_start: Vec<f64>,
    pub weights_before: Vec<f64>,
    pub meta_learning_rates: Vec<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignalAudit {
    entries: VecDeque<SignalSnapshot>,
    #[serde(skip)]
    pending: Option<PendingSnapshot>,
}

impl SignalAudit {
    pub fn new() -> Self {
        SignalAudit {
            entries: VecDeque::new(),
            pending: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &SignalSnapshot> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&SignalSnapshot> {
        self.entries.back()
    }

    pub(crate) fn restore(entries: Vec<SignalSnapshot>) -> Self {
        let mut ring: VecDeque<SignalSnapshot> = entries.into_iter().collect();
        while ring.len() > AUDIT_CAPACITY {
            ring.pop_front();
        }
        SignalAudit {
            entries: ring,
            pending: None,
        }
    }

    /// Phase 1: record the pre-gradient view. Replaces any abandoned
    /// pending entry.
    pub fn begin(&mut self, pending: PendingSnapshot) {
        self.pending = Some(pending);
    }

    /// Phase 2: extend the pending entry and commit it to the ring.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &mut self,
        weights_after: Vec<f64>,
        update: &WeightUpdate,
        attributions: Vec<f64>,
        fitness: Vec<f64>,
        blend_alpha: Option<f64>,
        mobius_v: Option<f64>,
    ) -> Option<&SignalSnapshot> {
        let p = self.pending.take()?;
        if self.entries.len() >= AUDIT_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(SignalSnapshot {
            session_index: p.session_index,
            timestamp: p.timestamp,
            r: p.r,
            r_adj: p.r_adj,
            signals: p.signals,
            weights_session_start: p.weights_session_start,
            weights_before: p.weights_before,
            meta_learning_rates: p.meta_learning_rates,
            weights_after,
            delta_w: update.delta.clone(),
            gradients: GradientBreakdown {
                energy: update.energy_term.clone(),
                outcome: update.outcome_term.clone(),
                replicator: update.replicator_term.clone(),
            },
            attributions,
            fitness,
            blend_alpha,
            mobius_v,
        });
        self.entries.back()
    }

    /// Drop an in-flight phase-1 entry (session aborted).
    pub fn abort(&mut self) {
        self.pending = None;
    }
}
