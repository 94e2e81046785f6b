//! Serialized sidecar state.
//!
//! Everything persistent outside the log entries themselves rides in one
//! blob under the reserved index slot, so a save is a consistent
//! snapshot of all persistent entities at one instant. Numeric fields
//! are re-validated on the way back in; an invalid field is dropped
//! (that subsystem re-initializes fresh) rather than failing the load.

use serde::{Deserialize, Serialize};

use crate::attribution::{CorrelationTracker, MobiusCharacteristic};
use crate::core::storage::consolidate::Snapshot;
use crate::dynamics::chain::Declaration;
use crate::dynamics::{DynamicsParams, SelfState, Vocabulary};
use crate::intel::{DomainTracker, InsightCompiler};
use crate::learning::audit::SignalSnapshot;
use crate::learning::ConfidenceCalibrator;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedState {
    pub vocabulary: Vocabulary,
    pub state: SelfState,
    pub params: DynamicsParams,
    pub chain: Vec<Declaration>,

    // Replicator sidecar
    pub fitness: Vec<f64>,
    pub meta_rates: Vec<f64>,
    pub session_count: u64,
    pub recent_attributions: Vec<Vec<f64>>,
    pub audit: Vec<SignalSnapshot>,

    // Attribution sidecars — whole-struct fields survive as-is or are
    // replaced wholesale on validation failure.
    pub correlation: Option<CorrelationTracker>,
    pub mobius: Option<MobiusCharacteristic>,

    // Outcome evaluator
    pub outcome_baseline: f64,
    pub outcome_sessions: u64,

    pub calibrator: Option<ConfidenceCalibrator>,
    pub compiler: Option<InsightCompiler>,
    pub domains: Option<DomainTracker>,

    // Mode observer history
    pub observer_energy: Vec<f64>,
    pub observer_noise: Vec<Vec<f64>>,
    pub observer_sessions: u64,

    pub snapshots: Vec<Snapshot>,
}

impl PersistedState {
    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let vocabulary = Vocabulary::fully_connected(
            vec!["a".into(), "b".into()],
            0.2,
        )
        .unwrap();
        let state = SelfState::uniform(2, 0.5);
        let persisted = PersistedState {
            vocabulary,
            state,
            params: DynamicsParams::balanced(2),
            chain: vec![],
            fitness: vec![0.1, 0.2],
            meta_rates: vec![1.0, 1.5],
            session_count: 3,
            recent_attributions: vec![vec![0.1, 0.2]],
            audit: vec![],
            correlation: Some(CorrelationTracker::new(2)),
            mobius: Some(MobiusCharacteristic::new(2)),
            outcome_baseline: 0.25,
            outcome_sessions: 3,
            calibrator: Some(ConfidenceCalibrator::new(2)),
            compiler: Some(InsightCompiler::new()),
            domains: Some(DomainTracker::new()),
            observer_energy: vec![0.5, 0.4],
            observer_noise: vec![vec![0.0], vec![0.1]],
            observer_sessions: 3,
            snapshots: vec![],
        };
        let json = persisted.to_json().unwrap();
        let back = PersistedState::from_json(json).unwrap();
        assert_eq!(back.fitness, persisted.fitness);
        assert_eq!(back.session_count, 3);
        assert_eq!(back.meta_rates, persisted.meta_rates);
        assert_eq!(back.observer_energy, persisted.observer_energy);
        assert!((back.outcome_baseline - 0.25).abs() < 1e-12);
    }
}
