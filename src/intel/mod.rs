//! Interpretive layer above the numeric core: objective strategy
//! features, domain expertise, compiled insight patterns and ranked
//! guidance.

pub mod compiler;
pub mod domain;
pub mod guidance;
pub mod strategy;

use serde::{Deserialize, Serialize};

/// One reflection insight tied to a behavioral dimension.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Insight {
    pub dimension: usize,
    pub observation: String,
    pub interpretation: String,
    pub suggested_value: f64,
    pub confidence: f64,
    pub pivotal: bool,
}

pub use compiler::{CompiledPattern, InsightCompiler};
pub use domain::{DomainProfile, DomainTracker};
pub use guidance::{Directive, DirectiveStrength, GuidanceEngine};
pub use strategy::{extract_features, StrategyFeatures};
