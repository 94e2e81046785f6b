//! The backward (ARIL) pass: outcome scoring, credit-driven weight
//! updates, mode observation and calibration.

pub mod audit;
pub mod calibrator;
pub mod modes;
pub mod outcome;
pub mod replicator;

pub use audit::{SignalAudit, SignalSnapshot};
pub use calibrator::ConfidenceCalibrator;
pub use modes::{Mode, ModeObserver, ModeReport};
pub use outcome::{OutcomeEvaluator, OutcomeInputs, OutcomeReport, SessionSignal};
pub use replicator::{ReplicatorOptimizer, WeightUpdate};
