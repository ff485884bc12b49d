//! Deterministic simulated judges for offline runs and tests.
//!
//! Each judge prefers the first-shown proposal when
//! `skill * (q_first - q_second) + first_bias + noise * logit(u) > 0`, where `u` is a
//! uniform draw hashed from `(seed, judge, first, second, attempt)`. Because every
//! draw is a pure function of the call, concurrent scheduling cannot change outcomes.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{JudgeError, JudgeOracle, JudgePrompt};
use crate::model::{CalibrationItem, Candidate, Judge, Tier};

/// Behaviour of one simulated judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeProfile {
    /// Sensitivity to the quality gap. 0 makes a coin-flip judge.
    pub skill: f64,
    /// Additive preference for the first-shown slot.
    pub first_bias: f64,
    /// Scale of the logistic noise term.
    pub noise: f64,
    /// Probability that a reply is prose instead of JSON.
    pub malformed_rate: f64,
    /// Zero-based attempt numbers on which the judge hangs.
    pub stall_attempts: Vec<u32>,
    /// Fail every call with a provider-style error.
    pub unavailable: bool,
}

impl Default for JudgeProfile {
    fn default() -> Self {
        Self {
            skill: 4.0,
            first_bias: 0.0,
            noise: 0.5,
            malformed_rate: 0.0,
            stall_attempts: Vec::new(),
            unavailable: false,
        }
    }
}

impl JudgeProfile {
    /// Always prefers the higher-quality proposal.
    pub fn perfect() -> Self {
        Self {
            skill: 1.0,
            noise: 0.0,
            ..Default::default()
        }
    }

    /// Ignores quality entirely.
    pub fn coin_flip() -> Self {
        Self {
            skill: 0.0,
            noise: 1.0,
            ..Default::default()
        }
    }
}

/// File format for `--simulate`: hidden quality per item and a profile per judge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSpec {
    pub seed: u64,
    pub quality: BTreeMap<String, f64>,
    pub judges: BTreeMap<String, JudgeProfile>,
    pub default_profile: JudgeProfile,
}

#[derive(Debug, Clone)]
pub struct SimulatedOracle {
    seed: u64,
    quality: BTreeMap<String, f64>,
    profiles: BTreeMap<String, JudgeProfile>,
    default_profile: JudgeProfile,
    stall: Duration,
}

impl SimulatedOracle {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            quality: BTreeMap::new(),
            profiles: BTreeMap::new(),
            default_profile: JudgeProfile::default(),
            stall: Duration::from_secs(3600),
        }
    }

    pub fn from_spec(spec: SimulationSpec) -> Self {
        Self {
            seed: spec.seed,
            quality: spec.quality,
            profiles: spec.judges,
            default_profile: spec.default_profile,
            stall: Duration::from_secs(3600),
        }
    }

    pub fn with_quality(mut self, id: impl Into<String>, quality: f64) -> Self {
        self.quality.insert(id.into(), quality);
        self
    }

    pub fn with_profile(mut self, judge: impl Into<String>, profile: JudgeProfile) -> Self {
        self.profiles.insert(judge.into(), profile);
        self
    }

    /// Quality for candidates without an explicit entry: a stable hash-derived value.
    pub fn with_candidates(mut self, candidates: &[Candidate]) -> Self {
        for c in candidates {
            let q = 2.0 * unit_draw(self.seed, &["quality", c.id.as_str()]) - 1.0;
            self.quality.entry(c.id.clone()).or_insert(q);
        }
        self
    }

    /// Quality for calibration items without an explicit entry, from their tier.
    pub fn with_calibration_items(mut self, items: &[CalibrationItem]) -> Self {
        for item in items {
            let q = match item.true_tier {
                Tier::High => 1.0,
                Tier::Mid => 0.0,
                Tier::Low => -1.0,
            };
            self.quality.entry(item.item_id.clone()).or_insert(q);
        }
        self
    }

    /// How long a stalled call hangs before returning.
    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.stall = stall;
        self
    }

    fn profile(&self, judge: &str) -> &JudgeProfile {
        self.profiles.get(judge).unwrap_or(&self.default_profile)
    }

    fn quality_of(&self, id: &str) -> f64 {
        self.quality.get(id).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl JudgeOracle for SimulatedOracle {
    async fn complete(&self, judge: &Judge, prompt: &JudgePrompt) -> Result<String, JudgeError> {
        let profile = self.profile(&judge.id);
        if profile.unavailable {
            return Err(JudgeError::Unavailable(format!(
                "simulated judge {} is offline",
                judge.id
            )));
        }
        if profile.stall_attempts.contains(&prompt.attempt) {
            tokio::time::sleep(self.stall).await;
            return Err(JudgeError::Timeout(self.stall));
        }

        let attempt = prompt.attempt.to_string();
        let draw = |tag: &str| {
            unit_draw(
                self.seed,
                &[
                    tag,
                    judge.id.as_str(),
                    prompt.first.id.as_str(),
                    prompt.second.id.as_str(),
                    attempt.as_str(),
                ],
            )
        };

        if draw("malformed") < profile.malformed_rate {
            return Ok(format!(
                "I found proposal A somewhat more convincing than B. ({})",
                prompt.match_id
            ));
        }

        let u = draw("verdict").clamp(1e-12, 1.0 - 1e-12);
        let gap = self.quality_of(&prompt.first.id) - self.quality_of(&prompt.second.id);
        let z = profile.skill * gap + profile.first_bias + profile.noise * (u / (1.0 - u)).ln();
        let winner = if z > 0.0 { "A" } else { "B" };
        let confidence = (0.5 + 0.5 * z.tanh().abs()).clamp(0.5, 1.0);

        Ok(serde_json::json!({
            "winner": winner,
            "confidence": confidence,
            "rationale": format!("simulated verdict from {}", judge.id),
        })
        .to_string())
    }
}

/// Uniform draw in [0, 1) from a hash of the seed and fields.
fn unit_draw(seed: u64, fields: &[&str]) -> f64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    for field in fields {
        hasher.update(b"|");
        hasher.update(field.as_bytes());
    }
    let hash = hasher.finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
}
