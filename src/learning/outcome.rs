//! Session outcome evaluation.
//!
//! Fuses the session's observable signals into a single scalar R in
//! [−1, 1], then subtracts a slow EMA baseline so the learner feeds on
//! surprise rather than absolute score.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::observer::InteractionRecord;
use crate::intel::strategy::is_verify_command;
use crate::utils::numerics::{safe_divide, safe_finite};

/// One fused signal with its fusion weight. Weight 0 means the signal
/// was present but excluded (non-finite value or caller opt-out).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSignal {
    pub name: String,
    pub value: f64,
    pub weight: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeReport {
    /// Raw weighted-average outcome.
    pub r: f64,
    /// Baseline-subtracted outcome driving attribution.
    pub r_adj: f64,
    pub energy_delta: f64,
    pub signals: Vec<SessionSignal>,
}

/// Everything the evaluator needs from one session.
pub struct OutcomeInputs<'a> {
    pub record: &'a InteractionRecord,
    pub energy_before: f64,
    pub energy_after: f64,
    pub coherence_before: f64,
    pub coherence_after: f64,
    pub declarations_made: usize,
    pub pivotal_confidences: &'a [f64],
    /// Caller-provided externals, e.g. ("git_survived", 1.0, 0.2).
    pub external_signals: &'a [(String, f64, f64)],
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutcomeEvaluator {
    baseline: f64,
    sessions: u64,
    /// Energy-delta squash scale.
    tau_energy: f64,
    /// Coherence-delta squash scale.
    tau_coherence: f64,
    baseline_rate: f64,
}

impl Default for OutcomeEvaluator {
    fn default() -> Self {
        OutcomeEvaluator {
            baseline: 0.0,
            sessions: 0,
            tau_energy: 0.5,
            tau_coherence: 0.2,
            baseline_rate: 0.1,
        }
    }
}

impl OutcomeEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    pub(crate) fn restore(baseline: f64, sessions: u64) -> Self {
        OutcomeEvaluator {
            baseline: safe_finite(baseline, 0.0),
            sessions,
            ..Self::default()
        }
    }

    pub fn evaluate(&mut self, inputs: &OutcomeInputs<'_>) -> OutcomeReport {
        let energy_delta = safe_finite(inputs.energy_before - inputs.energy_after, 0.0);
        let coherence_delta =
            safe_finite(inputs.coherence_before - inputs.coherence_after, 0.0);
        let record = inputs.record;
        let total_calls = record.tool_calls.len();

        let mut signals = vec![
            SessionSignal {
                name: "energy_improvement".into(),
                value: (energy_delta / self.tau_energy).tanh(),
                weight: 0.25,
            },
            SessionSignal {
                name: "coherence_improvement".into(),
                value: (coherence_delta / self.tau_coherence).tanh(),
                weight: 0.15,
            },
            SessionSignal {
                name: "declarations".into(),
                value: (inputs.declarations_made as f64 / 3.0).min(1.0),
                weight: 0.10,
            },
            SessionSignal {
                name: "error_density".into(),
                value: 1.0
                    - 2.0
                        * safe_divide(
                            record.failed_tool_calls() as f64,
                            total_calls as f64,
                            0.0,
                        )
                        .min(1.0),
                weight: 0.15,
            },
        ];

        let (arc_value, arc_weight) = session_arc(record);
        signals.push(SessionSignal {
            name: "session_arc".into(),
            value: arc_value,
            weight: arc_weight,
        });

        let insight_quality = if inputs.pivotal_confidences.is_empty() {
            f64::NAN
        } else {
            inputs
                .pivotal_confidences
                .iter()
                .map(|c| c.clamp(0.0, 1.0))
                .sum::<f64>()
                / inputs.pivotal_confidences.len() as f64
        };
        signals.push(SessionSignal {
            name: "insight_quality".into(),
            value: insight_quality,
            weight: 0.10,
        });

        for (name, value, weight) in inputs.external_signals {
            signals.push(SessionSignal {
                name: name.clone(),
                value: value.clamp(-1.0, 1.0),
                weight: *weight,
            });
        }

        // Non-finite values drop out of the fusion entirely.
        for s in signals.iter_mut() {
            if !s.value.is_finite() || !s.weight.is_finite() || s.weight <= 0.0 {
                s.weight = 0.0;
            }
        }

        let total_weight: f64 = signals.iter().map(|s| s.weight).sum();
        let r = if total_weight > 0.0 {
            signals.iter().map(|s| s.value * s.weight).sum::<f64>() / total_weight
        } else {
            0.0
        };
        let r = safe_finite(r, 0.0).clamp(-1.0, 1.0);

        // First session seeds the baseline; afterwards it trails at the
        // EMA rate and the adjusted outcome is measured against it.
        if self.sessions == 0 {
            self.baseline = r;
        } else {
            self.baseline =
                (1.0 - self.baseline_rate) * self.baseline + self.baseline_rate * r;
        }
        self.sessions += 1;
        let r_adj = r - self.baseline;

        debug!(
            "[Outcome] R={:.4} baseline={:.4} R_adj={:.4} ({} signals)",
            r,
            self.baseline,
            r_adj,
            signals.iter().filter(|s| s.weight > 0.0).count()
        );

        OutcomeReport {
            r,
            r_adj,
            energy_delta,
            signals,
        }
    }
}

/// Session-arc ladder: what shape of work the session contained.
/// Explore = context tools, implement = edits/writes, verify = test,
/// build or lint commands. A Read after a Write is output checking, not
/// verification, and deliberately does not count here.
fn session_arc(record: &InteractionRecord) -> (f64, f64) {
    if record.tool_calls.is_empty() {
        return (0.0, 0.0);
    }
    let explore = record
        .tool_calls
        .iter()
        .any(|c| matches!(c.tool.as_str(), "Read" | "Grep" | "Glob"));
    let implement = record
        .tool_calls
        .iter()
        .any(|c| matches!(c.tool.as_str(), "Edit" | "Write"));
    let verify = record.tool_calls.iter().any(|c| {
        c.tool == "Bash"
            && c.command
                .as_deref()
                .map(is_verify_command)
                .unwrap_or(false)
    });

    let value = match (explore, implement, verify) {
        (true, true, true) => 1.0,
        (false, true, true) => 0.8,
        (true, false, true) => 0.7,
        (false, false, true) => 0.6,
        (true, true, false) => 0.5,
        (false, true, false) => 0.3,
        (true, false, false) => 0.1,
        (false, false, false) => 0.0,
    };
    (value, 0.15)
}
