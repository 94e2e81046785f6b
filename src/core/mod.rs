//! Orchestration core: configuration, session capture, persistence and
//! the unified identity that owns every subsystem.

pub mod config;
pub mod identity;
pub mod observer;
pub mod storage;

pub use config::CoreConfig;
pub use identity::{spawn_autosave, IdentityStatus, SessionReport, UnifiedIdentity};
pub use observer::{InteractionRecord, SessionObserver, ToolCall};
