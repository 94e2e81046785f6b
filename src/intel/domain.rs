//! Domain exposure and expertise.
//!
//! Tool calls are classified into domain tags by path and command; each
//! session deposits outcome-weighted exposure, and expertise blends that
//! exposure with the energy curvature the profile shows in the domain
//! (flat curvature → still malleable → not yet expert).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::strategy::normalize_path;
use crate::core::observer::ToolCall;
use crate::utils::numerics::{safe_finite, sigmoid};

/// Curvature midpoint and scale of the expertise sigmoid.
const KAPPA_MID: f64 = 1.0;
const KAPPA_SCALE: f64 = 0.5;
/// Sessions of curvature data at which the blend fully trusts curvature.
const CURVATURE_SATURATION: f64 = 10.0;
/// Weighted sessions at which raw exposure alone reads as ~0.5 expert.
const EXPOSURE_HALF_POINT: f64 = 5.0;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomainProfile {
    pub raw_sessions: u64,
    pub weighted_sessions: f64,
    pub last_hessian: f64,
    pub hessian_mean: f64,
    pub curvature_sessions: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomainTracker {
    profiles: BTreeMap<String, DomainProfile>,
}

/// Map a single tool call to domain tags.
fn classify_call(call: &ToolCall) -> Vec<&'static str> {
    let mut tags = Vec::new();
    if let Some(path) = call.path.as_deref() {
        let p = normalize_path(path).to_lowercase();
        if p.ends_with(".rs") || p.ends_with("cargo.toml") {
            tags.push("rust");
        }
        if p.ends_with(".ts") || p.ends_with(".tsx") {
            tags.push("typescript");
        }
        if p.ends_with(".tsx") || p.ends_with(".jsx") {
            tags.push("react");
        }
        if p.ends_with(".py") {
            tags.push("python");
        }
        if p.ends_with(".go") {
            tags.push("go");
        }
        if p.ends_with(".sql") {
            tags.push("sql");
        }
        if p.ends_with(".md") {
            tags.push("docs");
        }
        if p.ends_with(".sh") {
            tags.push("shell");
        }
        if p.contains("anchor") || p.contains("solana") || p.contains("programs/") {
            tags.push("solana");
        }
    }
    if let Some(cmd) = call.command.as_deref() {
        if cmd.contains("cargo") {
            tags.push("rust");
        }
        if cmd.contains("npm") || cmd.contains("tsc") {
            tags.push("typescript");
        }
        if cmd.contains("pytest") || cmd.contains("python") {
            tags.push("python");
        }
        if cmd.contains("anchor") || cmd.contains("solana") {
            tags.push("solana");
        }
    }
    tags
}

impl DomainTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profiles(&self) -> &BTreeMap<String, DomainProfile> {
        &self.profiles
    }

    /// Domain tags touched by a set of tool calls.
    pub fn classify(calls: &[ToolCall]) -> BTreeSet<String> {
        calls
            .iter()
            .flat_map(classify_call)
            .map(str::to_string)
            .collect()
    }

    /// Deposit one session's exposure: outcome maps to [0,1] so a failed
    /// session contributes presence but no competence.
    pub fn record_session(&mut self, tags: &BTreeSet<String>, r: f64, mean_hessian: f64) {
        let exposure = ((safe_finite(r, 0.0) + 1.0) / 2.0).clamp(0.0, 1.0);
        let hessian = safe_finite(mean_hessian, 0.0);
        for tag in tags {
            let profile = self.profiles.entry(tag.clone()).or_default();
            profile.raw_sessions += 1;
            profile.weighted_sessions += exposure;
            profile.last_hessian = hessian;
            let k = profile.curvature_sessions as f64;
            profile.hessian_mean = (profile.hessian_mean * k + hessian) / (k + 1.0);
            profile.curvature_sessions += 1;
        }
    }

    /// Expertise in [0,1]: exposure saturates slowly; once enough
    /// curvature data exists, the blend trusts how firmly the profile
    /// actually sits in its wells.
    pub fn expertise(&self, tag: &str) -> f64 {
        let Some(profile) = self.profiles.get(tag) else {
            return 0.0;
        };
        let session_e =
            profile.weighted_sessions / (profile.weighted_sessions + EXPOSURE_HALF_POINT);
        let curvature_e = sigmoid((KAPPA_MID - profile.hessian_mean) / KAPPA_SCALE);
        let lambda = (profile.curvature_sessions as f64 / CURVATURE_SATURATION).min(1.0);
        ((1.0 - lambda) * session_e + lambda * curvature_e).clamp(0.0, 1.0)
    }

    /// Highest expertise over the given tags, 0.0 when none known.
    pub fn peak_expertise(&self, tags: &BTreeSet<String>) -> f64 {
        tags.iter()
            .map(|t| self.expertise(t))
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls_rust() -> Vec<ToolCall> {
        vec![
            ToolCall::new("Edit").with_path("src/main.rs"),
            ToolCall::new("Bash").with_command("cargo test"),
        ]
    }

    #[test]
    fn classification_by_path_and_command() {
        let tags = DomainTracker::classify(&calls_rust());
        assert!(tags.contains("rust"));
        let tags = DomainTracker::classify(&[
            ToolCall::new("Edit").with_path("app/Widget.tsx"),
        ]);
        assert!(tags.contains("typescript"));
        assert!(tags.contains("react"));
    }

    #[test]
    fn failed_sessions_deposit_no_competence() {
        let mut tracker = DomainTracker::new();
        let tags = DomainTracker::classify(&calls_rust());
        tracker.record_session(&tags, -1.0, 0.2);
        let p = &tracker.profiles()["rust"];
        assert_eq!(p.raw_sessions, 1);
        assert_eq!(p.weighted_sessions, 0.0);
    }

    #[test]
    fn expertise_grows_with_weighted_exposure() {
        let mut tracker = DomainTracker::new();
        let tags = DomainTracker::classify(&calls_rust());
        let before = tracker.expertise("rust");
        // low curvature (soft profile) keeps curvature expertise high
        for _ in 0..5 {
            tracker.record_session(&tags, 1.0, 0.2);
        }
        let after = tracker.expertise("rust");
        assert!(after > before);
        assert!(after <= 1.0);
    }

    #[test]
    fn stiff_curvature_reads_as_expert_once_trusted() {
        let mut tracker = DomainTracker::new();
        let tags: BTreeSet<String> = ["rust".to_string()].into_iter().collect();
        // hessian mean far below the midpoint -> sigmoid ~ 1
        for _ in 0..12 {
            tracker.record_session(&tags, 0.5, 0.0);
        }
        assert!(tracker.expertise("rust") > 0.8);

        let mut soft = DomainTracker::new();
        // hessian far above midpoint -> sigmoid ~ 0
        for _ in 0..12 {
            soft.record_session(&tags, 0.5, 3.0);
        }
        assert!(soft.expertise("rust") < 0.2);
    }

    #[test]
    fn unknown_domain_is_zero() {
        assert_eq!(DomainTracker::new().expertise("haskell"), 0.0);
    }
}
