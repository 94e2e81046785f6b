use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetryConfig;

/// Forward-pass configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvolutionConfig {
    /// Step size of one evolve step
    pub dt: f64,
    /// Evolve steps per session
    pub steps_per_session: usize,
    /// Gain applied to the session's experience vector
    pub experience_gain: f64,
}

/// Reflection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// Declare when a pivotal insight reaches this confidence
    pub declaration_confidence: f64,
}

/// Main hyperparameters for the identity core
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    pub evolution: EvolutionConfig,
    pub reflection: ReflectionConfig,
    /// Correlation history required before Shapley trusts it
    pub correlation_min_sessions: u64,
    /// Telemetry stays off unless this is present — env vars are ignored
    /// by design.
    pub telemetry: Option<TelemetryConfig>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            evolution: EvolutionConfig {
                dt: 0.05,
                steps_per_session: 10,
                experience_gain: 0.1,
            },
            reflection: ReflectionConfig {
                declaration_confidence: 0.8,
            },
            correlation_min_sessions: 5,
            telemetry: None,
        }
    }
}
