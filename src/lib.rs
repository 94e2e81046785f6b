//! aril-core — online identity-learning core for autonomous agents.
//!
//! Processes a stream of agent sessions (observed tool-call sequences
//! with a scalar outcome) and maintains a low-dimensional, persistent
//! behavioral profile. Each session runs a forward pass (gradient flow
//! under a double-well Lyapunov energy on the vocabulary graph) and a
//! backward pass (Shapley/Möbius credit assignment feeding a replicator
//! weight update), with a tamper-evident declaration chain and an
//! append-only private log underneath.

pub mod attribution;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod intel;
pub mod learning;
pub mod llm;
pub mod telemetry;
pub mod utils;

// Re-export the types most hosts touch.
pub use crate::attribution::{compute_shapley, MobiusCharacteristic, ShapleyAttribution};
pub use crate::core::config::CoreConfig;
pub use crate::core::identity::{IdentityStatus, SessionReport, UnifiedIdentity};
pub use crate::core::observer::{InteractionRecord, ToolCall};
pub use crate::core::storage::file_log::FileLog;
pub use crate::core::storage::{PrivateLog, StorageError};
pub use crate::dynamics::chain::{Declaration, DeclarationChain};
pub use crate::dynamics::{DynamicsParams, SelfState, Vocabulary};
pub use crate::error::{IdentityError, IdentityResult};
pub use crate::llm::LanguageModel;

/// Initialize tracing for the library.
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
