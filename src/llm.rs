//! Abstract language-model interface and the insight grammar.
//!
//! The core only needs one method — prompt in, text out — and a parser
//! for the one-line insight records a reflection returns. A response it
//! cannot parse means "no insights", never an error.

use async_trait::async_trait;
use tracing::debug;

use crate::intel::Insight;

/// Sentinel a reflection returns when nothing stood out.
pub const NO_INSIGHTS: &str = "NO_INSIGHTS";

/// Single-method model interface; implementors wrap whatever provider
/// the host uses.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, String>;
}

/// Reflection prompt over a session summary. The grammar is spelled out
/// verbatim so the parser and the prompt cannot drift apart.
pub fn reflection_prompt(session_summary: &str, dimension_names: &[String]) -> String {
    let dims: Vec<String> = dimension_names
        .iter()
        .enumerate()
        .map(|(i, name)| format!("{}={}", i, name))
        .collect();
    format!(
        "Review this agent session and extract behavioral insights.\n\
         Dimensions: {}\n\n\
         Session:\n{}\n\n\
         Reply with one line per insight, formatted exactly as:\n\
         INSIGHT|dim|observation|interpretation|suggestedValue|confidence|isPivotal\n\
         where dim is a dimension index, suggestedValue and confidence are in [0,1],\n\
         and isPivotal is true or false. If nothing stands out, reply {}.",
        dims.join(", "),
        session_summary,
        NO_INSIGHTS
    )
}

/// Parse `INSIGHT|dim|observation|interpretation|value|confidence|pivotal`
/// lines. Malformed lines are skipped; a `NO_INSIGHTS` sentinel (or
/// anything unparseable) yields an empty list.
pub fn parse_insights(text: &str, dimension_count: usize) -> Vec<Insight> {
    if text.trim().is_empty() || text.contains(NO_INSIGHTS) {
        return Vec::new();
    }
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if !line.starts_with("INSIGHT|") {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        if fields.len() != 7 {
            debug!("[LLM] malformed insight line skipped: {}", line);
            continue;
        }
        let Ok(dimension) = fields[1].trim().parse::<usize>() else {
            continue;
        };
        if dimension >= dimension_count {
            continue;
        }
        let Ok(suggested_value) = fields[4].trim().parse::<f64>() else {
            continue;
        };
        let Ok(confidence) = fields[5].trim().parse::<f64>() else {
            continue;
        };
        if !suggested_value.is_finite() || !confidence.is_finite() {
            continue;
        }
        let pivotal = matches!(fields[6].trim().to_lowercase().as_str(), "true" | "yes" | "1");
        out.push(Insight {
            dimension,
            observation: fields[2].trim().to_string(),
            interpretation: fields[3].trim().to_string(),
            suggested_value: suggested_value.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            pivotal,
        });
    }
    out
}
