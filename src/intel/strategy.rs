//! Objective behavioral features from a tool-call sequence.
//!
//! Five scalars in [0,1] computed from the raw session record, with no
//! model in the loop. The test-command regex set defined here is the
//! single source of truth — the outcome evaluator's arc detection uses
//! the same patterns.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::observer::InteractionRecord;
use crate::utils::numerics::safe_divide;

/// Commands that count as running tests.
pub static TEST_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bnpm\s+(run\s+)?test\b",
        r"\bjest\b",
        r"\bpytest\b",
        r"\bcargo\s+test\b",
        r"\bgo\s+test\b",
        r"\bmake\s+test\b",
        r"\bmocha\b",
        r"\bvitest\b",
        r"\bdotnet\s+test\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Commands that count as verification without being tests: builds,
/// type checks and linters.
pub static VERIFY_COMMANDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bcargo\s+(build|check|clippy)\b",
        r"\bnpm\s+run\s+(build|lint|typecheck)\b",
        r"\btsc\b",
        r"\beslint\b",
        r"\bgo\s+(build|vet)\b",
        r"\bmake(\s+(build|all|check|lint))?\s*$",
        r"\bmypy\b",
        r"\bruff\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

pub fn is_test_command(command: &str) -> bool {
    TEST_COMMANDS.iter().any(|r| r.is_match(command))
}

pub fn is_verify_command(command: &str) -> bool {
    is_test_command(command) || VERIFY_COMMANDS.iter().any(|r| r.is_match(command))
}

/// Fold separators, strip `./`, trim trailing slashes, collapse runs.
pub fn normalize_path(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while p.starts_with("./") {
        p = p[2..].to_string();
    }
    let mut collapsed = String::with_capacity(p.len());
    let mut prev_slash = false;
    for c in p.chars() {
        if c == '/' {
            if !prev_slash {
                collapsed.push(c);
            }
            prev_slash = true;
        } else {
            collapsed.push(c);
            prev_slash = false;
        }
    }
    while collapsed.ends_with('/') && collapsed.len() > 1 {
        collapsed.pop();
    }
    collapsed
}

/// The five objective features, each in [0,1].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyFeatures {
    /// Edits preceded by a Read of the same path / total edits.
    pub read_before_edit: f64,
    /// Edits followed within 5 calls by a test command / total edits.
    pub test_after_change: f64,
    /// Read+Grep+Glob share of the first third of the session.
    pub context_gathering: f64,
    /// Writes later re-read at the same path / total writes.
    pub output_verification: f64,
    /// 1 / mean calls-to-recovery after a failed command.
    pub error_recovery_speed: f64,
}

impl StrategyFeatures {
    pub fn as_vec(&self) -> Vec<f64> {
        vec![
            self.read_before_edit,
            self.test_after_change,
            self.context_gathering,
            self.output_verification,
            self.error_recovery_speed,
        ]
    }

    pub const COUNT: usize = 5;
}

/// Recovery distances beyond this count as a full stall.
const RECOVERY_CAP: f64 = 20.0;
/// How far ahead of an edit a test run still counts for it.
const TEST_LOOKAHEAD: usize = 5;

pub fn extract_features(record: &InteractionRecord) -> StrategyFeatures {
    let calls = &record.tool_calls;

    let norm_path = |c: &crate::core::observer::ToolCall| c.path.as_deref().map(normalize_path);

    // read_before_edit: a Read of the same normalized path earlier in the
    // session covers the edit.
    let mut edits = 0usize;
    let mut covered_edits = 0usize;
    for (k, call) in calls.iter().enumerate() {
        if call.tool == "Edit" {
            edits += 1;
            if let Some(p) = norm_path(call) {
                let seen = calls[..k].iter().any(|prior| {
                    prior.tool == "Read" && prior.path.as_deref().map(normalize_path) == Some(p.clone())
                });
                if seen {
                    covered_edits += 1;
                }
            }
        }
    }
    let read_before_edit = safe_divide(covered_edits as f64, edits as f64, 0.0);

    // test_after_change: a matching Bash command within the look-ahead.
    let mut tested_edits = 0usize;
    for (k, call) in calls.iter().enumerate() {
        if call.tool == "Edit" {
            let window = &calls[k + 1..calls.len().min(k + 1 + TEST_LOOKAHEAD)];
            if window.iter().any(|c| {
                c.tool == "Bash"
                    && c.command.as_deref().map(is_test_command).unwrap_or(false)
            }) {
                tested_edits += 1;
            }
        }
    }
    let test_after_change = safe_divide(tested_edits as f64, edits as f64, 0.0);

    // context_gathering over the first ⌈len/3⌉ calls.
    let first_third = calls.len().div_ceil(3);
    let gather = calls[..first_third]
        .iter()
        .filter(|c| matches!(c.tool.as_str(), "Read" | "Grep" | "Glob"))
        .count();
    let context_gathering = safe_divide(gather as f64, first_third as f64, 0.0);

    // output_verification: Write then a later Read of the same path.
    let mut writes = 0usize;
    let mut verified_writes = 0usize;
    for (k, call) in calls.iter().enumerate() {
        if call.tool == "Write" {
            writes += 1;
            if let Some(p) = norm_path(call) {
                let reread = calls[k + 1..].iter().any(|later| {
                    later.tool == "Read" && later.path.as_deref().map(normalize_path) == Some(p.clone())
                });
                if reread {
                    verified_writes += 1;
                }
            }
        }
    }
    let output_verification = safe_divide(verified_writes as f64, writes as f64, 0.0);

    // error_recovery_speed: distance from each failed Bash to the next
    // successful one, capped; no failures at all scores 1.0.
    let mut recoveries = Vec::new();
    for (k, call) in calls.iter().enumerate() {
        if call.tool == "Bash" && !call.success {
            let dist = calls[k + 1..]
                .iter()
                .position(|c| c.tool == "Bash" && c.success)
                .map(|d| (d + 1) as f64)
                .unwrap_or(RECOVERY_CAP);
            recoveries.push(dist.min(RECOVERY_CAP));
        }
    }
    let error_recovery_speed = if recoveries.is_empty() {
        1.0
    } else {
        let mean = recoveries.iter().sum::<f64>() / recoveries.len() as f64;
        safe_divide(1.0, mean, 0.0).min(1.0)
    };

    StrategyFeatures {
        read_before_edit,
        test_after_change,
        context_gathering,
        output_verification,
        error_recovery_speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observer::ToolCall;

    fn record(calls: Vec<ToolCall>) -> InteractionRecord {
        let mut rec = InteractionRecord::new("s");
        rec.tool_calls = calls;
        rec
    }

    #[test]
    fn path_normalization_folds_and_trims() {
        assert_eq!(normalize_path("./src\\lib.rs"), "src/lib.rs");
        assert_eq!(normalize_path("a//b///c/"), "a/b/c");
        assert_eq!(normalize_path("./././x"), "x");
    }

    #[test]
    fn test_command_set_matches_known_runners() {
        for cmd in [
            "npm test",
            "npm run test -- --watch",
            "cargo test --release",
            "go test ./...",
            "pytest tests/",
            "dotnet test",
        ] {
            assert!(is_test_command(cmd), "{}", cmd);
        }
        assert!(!is_test_command("cargo build"));
        assert!(is_verify_command("cargo build"));
        assert!(is_verify_command("npm run lint"));
        assert!(!is_verify_command("ls -la"));
    }

    #[test]
    fn read_before_edit_requires_same_path() {
        let rec = record(vec![
            ToolCall::new("Read").with_path("src/a.rs"),
            ToolCall::new("Edit").with_path("./src/a.rs"),
            ToolCall::new("Edit").with_path("src/b.rs"),
        ]);
        let f = extract_features(&rec);
        assert!((f.read_before_edit - 0.5).abs() < 1e-12);
    }

    #[test]
    fn no_edits_scores_zero() {
        let rec = record(vec![ToolCall::new("Read").with_path("x")]);
        let f = extract_features(&rec);
        assert_eq!(f.read_before_edit, 0.0);
        assert_eq!(f.test_after_change, 0.0);
    }

    #[test]
    fn test_after_change_honors_lookahead() {
        let mut calls = vec![ToolCall::new("Edit").with_path("a")];
        for _ in 0..5 {
            calls.push(ToolCall::new("Read").with_path("a"));
        }
        calls.push(ToolCall::new("Bash").with_command("cargo test"));
        let f = extract_features(&record(calls));
        // the test run lands one call beyond the window
        assert_eq!(f.test_after_change, 0.0);

        let calls = vec![
            ToolCall::new("Edit").with_path("a"),
            ToolCall::new("Bash").with_command("cargo test"),
        ];
        let f = extract_features(&record(calls));
        assert_eq!(f.test_after_change, 1.0);
    }

    #[test]
    fn context_gathering_uses_first_third() {
        let calls = vec![
            ToolCall::new("Read").with_path("a"),
            ToolCall::new("Grep"),
            ToolCall::new("Edit").with_path("a"),
            ToolCall::new("Edit").with_path("a"),
            ToolCall::new("Edit").with_path("a"),
            ToolCall::new("Edit").with_path("a"),
        ];
        // first ⌈6/3⌉ = 2 calls are both gathering
        let f = extract_features(&record(calls));
        assert_eq!(f.context_gathering, 1.0);
    }

    #[test]
    fn recovery_speed_defaults_to_one_without_failures() {
        let f = extract_features(&record(vec![ToolCall::new("Bash").with_command("ls")]));
        assert_eq!(f.error_recovery_speed, 1.0);
    }

    #[test]
    fn recovery_speed_penalizes_slow_recovery() {
        let calls = vec![
            ToolCall::new("Bash").with_command("cargo test").failed(),
            ToolCall::new("Read").with_path("a"),
            ToolCall::new("Bash").with_command("cargo test"),
        ];
        let f = extract_features(&record(calls));
        // recovery took 2 calls -> 1/2
        assert!((f.error_recovery_speed - 0.5).abs() < 1e-12);

        let calls = vec![ToolCall::new("Bash").with_command("x").failed()];
        let f = extract_features(&record(calls));
        assert!((f.error_recovery_speed - 1.0 / 20.0).abs() < 1e-12);
    }
}
