//! Guidance engine.
//!
//! Folds fitness, the energy gradient, compiled patterns, the mode
//! observer and Möbius diagnostics into a ranked directive list. The
//! markdown rendering is a pure projection of that list — same inputs,
//! same bytes.

use serde::{Deserialize, Serialize};

use super::compiler::CompiledPattern;
use crate::attribution::MobiusDiagnostics;
use crate::dynamics::Vocabulary;
use crate::learning::modes::{Mode, ModeReport};
use crate::utils::numerics::mean;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DirectiveStrength {
    Must,
    Should,
    Consider,
}

impl DirectiveStrength {
    fn label(&self) -> &'static str {
        match self {
            DirectiveStrength::Must => "must",
            DirectiveStrength::Should => "should",
            DirectiveStrength::Consider => "consider",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Directive {
    pub text: String,
    pub strength: DirectiveStrength,
    pub score: f64,
    pub source: String,
}

#[derive(Clone, Debug, Default)]
pub struct GuidanceEngine;

impl GuidanceEngine {
    pub fn new() -> Self {
        GuidanceEngine
    }

    #[allow(clippy::too_many_arguments)]
    pub fn rank(
        &self,
        vocab: &Vocabulary,
        fitness: &[f64],
        gradients: &[f64],
        patterns: &[CompiledPattern],
        mode: Option<&ModeReport>,
        mobius: Option<&MobiusDiagnostics>,
    ) -> Vec<Directive> {
        let mut out = Vec::new();
        let n = vocab.len();
        let f_bar = mean(fitness);

        // Fitness leader: the dimension the replicator is betting on.
        if let Some((best, &f)) = fitness
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            if best < n && f > f_bar && f > 0.0 {
                out.push(Directive {
                    text: format!("lean on '{}' — it keeps paying off", vocab.name(best)),
                    strength: if f > 2.0 * f_bar.max(1e-6) {
                        DirectiveStrength::Must
                    } else {
                        DirectiveStrength::Should
                    },
                    score: f,
                    source: "fitness".into(),
                });
            }
        }

        // Energy gradient: where the landscape is actively pulling.
        for i in 0..n.min(gradients.len()) {
            let g = gradients[i];
            if g.abs() < 0.05 {
                continue;
            }
            let text = if g > 0.0 {
                format!("'{}' is overextended; let it settle", vocab.name(i))
            } else {
                format!("'{}' has room to grow", vocab.name(i))
            };
            out.push(Directive {
                text,
                strength: DirectiveStrength::Consider,
                score: g.abs(),
                source: "energy".into(),
            });
        }

        // Compiled patterns are earned behavior — keep them alive.
        for p in patterns {
            out.push(Directive {
                text: format!("keep doing: {}", p.text),
                strength: if p.confidence > 0.6 {
                    DirectiveStrength::Should
                } else {
                    DirectiveStrength::Consider
                },
                score: p.confidence,
                source: "pattern".into(),
            });
        }

        if let Some(report) = mode {
            if report.mode == Mode::Search {
                out.push(Directive {
                    text: "profile is in search mode — gather context before committing".into(),
                    strength: DirectiveStrength::Should,
                    score: report.mode_score.min(10.0),
                    source: "observer".into(),
                });
            }
            for (i, &p) in report.tunneling.iter().enumerate() {
                if p > 0.5 && i < n {
                    out.push(Directive {
                        text: format!(
                            "'{}' may flip wells this session (tunnel p={:.2})",
                            vocab.name(i),
                            p
                        ),
                        strength: DirectiveStrength::Consider,
                        score: p,
                        source: "observer".into(),
                    });
                }
            }
            if report.consolidation_delta > 0.0 {
                out.push(Directive {
                    text: "evolved profile does not yet beat a uniform one".into(),
                    strength: DirectiveStrength::Consider,
                    score: report.consolidation_delta.min(1.0),
                    source: "observer".into(),
                });
            }
        }

        if let Some(diag) = mobius {
            if let Some((dims, strength)) = &diag.strongest_interaction {
                if diag.data_adequate && dims.len() >= 2 {
                    let names: Vec<&str> =
                        dims.iter().filter(|&&d| d < n).map(|&d| vocab.name(d)).collect();
                    if names.len() >= 2 {
                        out.push(Directive {
                            text: format!(
                                "'{}' and '{}' work better together than apart",
                                names[0], names[1]
                            ),
                            strength: DirectiveStrength::Should,
                            score: *strength,
                            source: "mobius".into(),
                        });
                    }
                }
            }
        }

        // Deterministic order: strength first, then score, then text.
        out.sort_by(|a, b| {
            a.strength
                .cmp(&b.strength)
                .then(
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.text.cmp(&b.text))
        });
        out
    }

    /// Deterministic markdown projection of a directive list.
    pub fn to_markdown(&self, directives: &[Directive]) -> String {
        let mut md = String::from("# Guidance\n\n");
        if directives.is_empty() {
            md.push_str("_No directives yet._\n");
            return md;
        }
        for d in directives {
            md.push_str(&format!(
                "- **{}** {} _(source: {}, score {:.2})_\n",
                d.strength.label(),
                d.text,
                d.source,
                d.score
            ));
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::fully_connected(
            vec!["curiosity".into(), "precision".into(), "persistence".into()],
            0.1,
        )
        .unwrap()
    }

    #[test]
    fn fitness_leader_tops_the_list() {
        let engine = GuidanceEngine::new();
        let out = engine.rank(
            &vocab(),
            &[0.9, 0.05, 0.05],
            &[0.0, 0.0, 0.0],
            &[],
            None,
            None,
        );
        assert!(!out.is_empty());
        assert_eq!(out[0].strength, DirectiveStrength::Must);
        assert!(out[0].text.contains("curiosity"));
    }

    #[test]
    fn gradient_directions_read_correctly() {
        let engine = GuidanceEngine::new();
        let out = engine.rank(&vocab(), &[], &[0.2, -0.2, 0.0], &[], None, None);
        assert!(out.iter().any(|d| d.text.contains("overextended")));
        assert!(out.iter().any(|d| d.text.contains("room to grow")));
        assert_eq!(out.iter().filter(|d| d.source == "energy").count(), 2);
    }

    #[test]
    fn markdown_is_deterministic() {
        let engine = GuidanceEngine::new();
        let out = engine.rank(&vocab(), &[0.5, 0.1, 0.1], &[0.1, 0.0, 0.0], &[], None, None);
        assert_eq!(engine.to_markdown(&out), engine.to_markdown(&out));
        assert!(engine.to_markdown(&[]).contains("No directives"));
    }
}
