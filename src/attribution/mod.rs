//! Per-dimension credit assignment for session outcomes.
//!
//! Three cooperating pieces: a Welford correlation tracker between
//! per-dimension metrics and outcomes, an exact Shapley allocator over
//! coalition values, and a learned Möbius characteristic function that
//! captures synergies the additive allocator cannot. The orchestrator
//! blends the latter two as observations accumulate.

pub mod correlation;
pub mod mobius;
pub mod shapley;

pub use correlation::CorrelationTracker;
pub use mobius::{MobiusCharacteristic, MobiusDiagnostics};
pub use shapley::{compute_shapley, ShapleyAttribution};
