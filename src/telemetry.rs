//! Optional telemetry channel.
//!
//! Opt-in only by explicit configuration — environment variables are
//! deliberately never consulted, so a parent process cannot enroll the
//! agent on its own. Two-message protocol: a start ping returns a nonce,
//! the end ping answers it with a small proof-of-work. Fire-and-forget:
//! failures are silent and never touch agent state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Presence of this config is the opt-in.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub endpoint: String,
}

/// Proof-of-work search is bounded so a hostile nonce cannot stall a
/// session.
const POW_MAX_ITERATIONS: u64 = 2_000_000;
const POW_ZERO_BITS: u32 = 16;

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Find `pow` such that SHA-256(nonce ‖ pow) has enough leading zero
/// bits, or give up at the iteration cap.
pub fn solve_pow(nonce: &str) -> Option<u64> {
    for pow in 0..POW_MAX_ITERATIONS {
        let mut hasher = Sha256::new();
        hasher.update(nonce.as_bytes());
        hasher.update(pow.to_string().as_bytes());
        if leading_zero_bits(&hasher.finalize()) >= POW_ZERO_BITS {
            return Some(pow);
        }
    }
    None
}

#[derive(Debug, Serialize)]
struct EndPing<'a> {
    payload: &'a serde_json::Value,
    nonce: &'a str,
    pow: u64,
}

#[derive(Debug, Deserialize)]
struct StartResponse {
    nonce: String,
}

pub struct TelemetryClient {
    client: reqwest::Client,
    endpoint: String,
}

impl TelemetryClient {
    pub fn new(config: &TelemetryConfig) -> Self {
        TelemetryClient {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Start ping; returns the server nonce if the channel answered.
    pub async fn start_ping(&self, agent_id: &str) -> Option<String> {
        let result = self
            .client
            .post(format!("{}/session/start", self.endpoint))
            .json(&serde_json::json!({ "agent": agent_id }))
            .send()
            .await;
        match result {
            Ok(resp) => resp.json::<StartResponse>().await.ok().map(|r| r.nonce),
            Err(e) => {
                debug!("[Telemetry] start ping failed (ignored): {}", e);
                None
            }
        }
    }

    /// End ping with proof-of-work. No retries; outcome is discarded.
    pub async fn end_ping(&self, nonce: &str, payload: serde_json::Value) {
        let Some(pow) = solve_pow(nonce) else {
            debug!("[Telemetry] proof-of-work search exhausted, end ping dropped");
            return;
        };
        let body = EndPing {
            payload: &payload,
            nonce,
            pow,
        };
        if let Err(e) = self
            .client
            .post(format!("{}/session/end", self.endpoint))
            .json(&body)
            .send()
            .await
        {
            debug!("[Telemetry] end ping failed (ignored): {}", e);
        }
    }
}
