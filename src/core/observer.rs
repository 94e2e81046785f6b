//! Per-session behavioral capture.
//!
//! The observer buffers everything the host reports during one session —
//! tool calls, decisions, failures, verifications, information seeks —
//! into an `InteractionRecord` that exists only until `harvest`.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One observed tool invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub path: Option<String>,
    pub command: Option<String>,
    pub success: bool,
    pub timestamp: i64,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>) -> Self {
        ToolCall {
            tool: tool.into(),
            path: None,
            command: None,
            success: true,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = false;
        self
    }
}

/// Everything captured during one session. Session-scoped only; the
/// persistent profile never holds a live reference to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: String,
    pub tool_calls: Vec<ToolCall>,
    pub decisions: Vec<String>,
    pub failures: Vec<String>,
    pub verifications: Vec<String>,
    pub information_seeks: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub resource_usage: HashMap<String, f64>,
}

impl InteractionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        InteractionRecord {
            id: id.into(),
            tool_calls: Vec::new(),
            decisions: Vec::new(),
            failures: Vec::new(),
            verifications: Vec::new(),
            information_seeks: Vec::new(),
            start_time: Utc::now().timestamp(),
            end_time: 0,
            resource_usage: HashMap::new(),
        }
    }

    pub fn failed_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|c| !c.success).count()
    }
}

/// Session-scoped event buffer.
#[derive(Debug, Default)]
pub struct SessionObserver {
    active: Option<InteractionRecord>,
}

impl SessionObserver {
    pub fn new() -> Self {
        SessionObserver { active: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|r| r.id.as_str())
    }

    pub fn begin(&mut self, id: &str) {
        debug!("[Observer] capture started for session '{}'", id);
        self.active = Some(InteractionRecord::new(id));
    }

    /// Events arriving outside a session are dropped with a warning —
    /// a transient host bug must not destroy in-flight state.
    fn buffer(&mut self, what: &str) -> Option<&mut InteractionRecord> {
        if self.active.is_none() {
            warn!("[Observer] {} recorded with no active session, dropped", what);
        }
        self.active.as_mut()
    }

    pub fn record_tool_call(&mut self, call: ToolCall) {
        if let Some(rec) = self.buffer("tool call") {
            rec.tool_calls.push(call);
        }
    }

    pub fn record_decision(&mut self, text: &str) {
        if let Some(rec) = self.buffer("decision") {
            rec.decisions.push(text.to_string());
        }
    }

    pub fn record_failure(&mut self, text: &str) {
        if let Some(rec) = self.buffer("failure") {
            rec.failures.push(text.to_string());
        }
    }

    pub fn record_verification(&mut self, text: &str) {
        if let Some(rec) = self.buffer("verification") {
            rec.verifications.push(text.to_string());
        }
    }

    pub fn record_information_seek(&mut self, text: &str) {
        if let Some(rec) = self.buffer("information seek") {
            rec.information_seeks.push(text.to_string());
        }
    }

    pub fn record_resource_usage(&mut self, key: &str, value: f64) {
        if let Some(rec) = self.buffer("resource usage") {
            rec.resource_usage
                .insert(key.to_string(), crate::utils::numerics::safe_finite(value, 0.0));
        }
    }

    /// Close the capture and hand the record out by value.
    pub fn harvest(&mut self) -> Option<InteractionRecord> {
        let mut rec = self.active.take()?;
        rec.end_time = Utc::now().timestamp();
        Some(rec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_buffer_in_arrival_order() {
        let mut obs = SessionObserver::new();
        obs.begin("s1");
        obs.record_tool_call(ToolCall::new("Read").with_path("src/lib.rs"));
        obs.record_tool_call(ToolCall::new("Edit").with_path("src/lib.rs"));
        obs.record_decision("refactor first");
        let rec = obs.harvest().unwrap();
        assert_eq!(rec.tool_calls.len(), 2);
        assert_eq!(rec.tool_calls[0].tool, "Read");
        assert_eq!(rec.decisions, vec!["refactor first"]);
        assert!(!obs.is_active());
    }

    #[test]
    fn events_without_session_are_dropped() {
        let mut obs = SessionObserver::new();
        obs.record_failure("lost");
        assert!(obs.harvest().is_none());
    }

    #[test]
    fn failed_calls_are_counted() {
        let mut rec = InteractionRecord::new("s");
        rec.tool_calls.push(ToolCall::new("Bash").failed());
        rec.tool_calls.push(ToolCall::new("Bash"));
        assert_eq!(rec.failed_tool_calls(), 1);
    }
}
