//! Insight compilation.
//!
//! Raw reflection insights accumulate per dimension; once a dimension
//! has enough of them *and* its fitness is pulling above the mean, they
//! compile into a named pattern. Patterns decay exponentially with
//! staleness, faster when the dimension's fitness sags.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Insight;
use crate::utils::numerics::{mean, safe_finite};

/// Insights needed in a dimension before a pattern forms.
const COMPILE_THRESHOLD: usize = 3;
/// Evidence strings kept per pattern.
const EVIDENCE_CAP: usize = 5;
/// Base per-session staleness decay.
const DECAY_RATE: f64 = 0.05;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompiledPattern {
    pub dimension: usize,
    pub text: String,
    pub evidence: Vec<String>,
    pub confidence: f64,
    pub shapley_weight: f64,
    pub session_count: u64,
    pub first_seen: i64,
    pub last_reinforced: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsightCompiler {
    pending: BTreeMap<usize, Vec<Insight>>,
    patterns: Vec<CompiledPattern>,
}

impl InsightCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    pub fn pending_count(&self, dimension: usize) -> usize {
        self.pending.get(&dimension).map(Vec::len).unwrap_or(0)
    }

    pub fn ingest(&mut self, insight: Insight) {
        self.pending
            .entry(insight.dimension)
            .or_default()
            .push(insight);
    }

    /// Compile ready dimensions and refresh existing patterns.
    ///
    /// The fitness gate is skipped when no fitness history exists yet
    /// (first sessions would otherwise never compile anything).
    pub fn compile(&mut self, fitness: &[f64], shapley: &[f64], session: u64) {
        let f_bar = mean(fitness);
        let ready: Vec<usize> = self
            .pending
            .iter()
            .filter(|(dim, insights)| {
                insights.len() >= COMPILE_THRESHOLD
                    && (fitness.is_empty()
                        || fitness.get(**dim).copied().unwrap_or(0.0) > f_bar)
            })
            .map(|(dim, _)| *dim)
            .collect();

        for dim in ready {
            let insights = self.pending.remove(&dim).unwrap_or_default();
            let Some(latest) = insights.last() else { continue };
            let dim_fitness = fitness.get(dim).copied().unwrap_or(0.0);
            let phi = shapley.get(dim).copied().unwrap_or(0.0);
            let mut evidence: Vec<String> =
                insights.iter().map(|i| i.observation.clone()).collect();
            evidence.truncate(EVIDENCE_CAP);
            let confidence = insights
                .iter()
                .map(|i| i.confidence.clamp(0.0, 1.0))
                .sum::<f64>()
                / insights.len() as f64;

            if let Some(existing) = self.patterns.iter_mut().find(|p| p.dimension == dim) {
                existing.text = latest.interpretation.clone();
                existing.evidence = evidence;
                existing.confidence = safe_finite(
                    0.5 * existing.confidence + 0.5 * confidence,
                    existing.confidence,
                );
                existing.shapley_weight = phi;
                existing.session_count += 1;
                existing.last_reinforced = session;
            } else {
                info!(
                    "[Compiler] pattern formed on dimension {} from {} insights",
                    dim,
                    insights.len()
                );
                self.patterns.push(CompiledPattern {
                    dimension: dim,
                    text: latest.interpretation.clone(),
                    evidence,
                    confidence,
                    shapley_weight: phi,
                    session_count: 1,
                    first_seen: Utc::now().timestamp(),
                    last_reinforced: session,
                });
            }
        }
    }

    /// Exponential staleness decay; sagging fitness doubles the rate.
    /// Patterns below the floor are dropped.
    pub fn decay(&mut self, fitness: &[f64], session: u64) {
        let f_bar = mean(fitness);
        for p in self.patterns.iter_mut() {
            let staleness = session.saturating_sub(p.last_reinforced) as f64;
            let sagging = !fitness.is_empty()
                && fitness.get(p.dimension).copied().unwrap_or(0.0) < f_bar;
            let rate = if sagging { DECAY_RATE * 2.0 } else { DECAY_RATE };
            p.confidence = safe_finite(p.confidence * (-rate * staleness).exp(), 0.0);
        }
        self.patterns.retain(|p| p.confidence > 0.05);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insight(dim: usize, conf: f64) -> Insight {
        Insight {
            dimension: dim,
            observation: format!("observed on dim {}", dim),
            interpretation: format!("tends to verify work on dim {}", dim),
            suggested_value: 0.7,
            confidence: conf,
            pivotal: false,
        }
    }

    #[test]
    fn three_insights_and_fit_dimension_compile() {
        let mut c = InsightCompiler::new();
        for _ in 0..3 {
            c.ingest(insight(0, 0.8));
        }
        c.ingest(insight(1, 0.8));
        c.compile(&[0.6, 0.1], &[0.3, 0.0], 10);
        assert_eq!(c.patterns().len(), 1);
        assert_eq!(c.patterns()[0].dimension, 0);
        assert_eq!(c.pending_count(0), 0);
        assert_eq!(c.pending_count(1), 1);
    }

    #[test]
    fn unfit_dimension_stays_pending() {
        let mut c = InsightCompiler::new();
        for _ in 0..3 {
            c.ingest(insight(1, 0.8));
        }
        // dim 1 fitness below the mean
        c.compile(&[0.6, 0.1], &[0.0, 0.0], 5);
        assert!(c.patterns().is_empty());
        assert_eq!(c.pending_count(1), 3);
    }

    #[test]
    fn empty_fitness_skips_the_gate() {
        let mut c = InsightCompiler::new();
        for _ in 0..3 {
            c.ingest(insight(2, 0.9));
        }
        c.compile(&[], &[], 1);
        assert_eq!(c.patterns().len(), 1);
    }

    #[test]
    fn stale_low_fitness_patterns_decay_faster() {
        let mut c = InsightCompiler::new();
        for _ in 0..3 {
            c.ingest(insight(0, 0.9));
        }
        for _ in 0..3 {
            c.ingest(insight(1, 0.9));
        }
        c.compile(&[], &[], 0);
        assert_eq!(c.patterns().len(), 2);

        // dim 0 sags below the mean, dim 1 stays above
        c.decay(&[0.0, 0.5], 20);
        let p0 = c.patterns().iter().find(|p| p.dimension == 0);
        let p1 = c.patterns().iter().find(|p| p.dimension == 1);
        match (p0, p1) {
            (None, Some(_)) => {} // dim 0 already dropped
            (Some(a), Some(b)) => assert!(a.confidence < b.confidence),
            other => panic!("unexpected decay outcome: {:?}", other),
        }
    }
}
