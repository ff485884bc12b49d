//! Records shared by every stage: candidates, judges, calibration items and the match log.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::Channel;

pub type CandidateId = String;
pub type JudgeId = String;

// =============================================================================
// Candidates
// =============================================================================

/// A screened proposal. Immutable once it enters the ranking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub text: String,
    #[serde(default)]
    pub taxonomy_labels: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_channel: Option<Channel>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            taxonomy_labels: BTreeSet::new(),
            origin_channel: None,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taxonomy_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.origin_channel = Some(channel);
        self
    }
}

// =============================================================================
// Judges
// =============================================================================

/// Judge identity. Reliability and position bias are estimated, never configured here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Judge {
    pub id: JudgeId,
    pub provider: String,
    /// Model routed to by remote oracles. Defaults to the id.
    pub model: String,
}

impl Judge {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            model: id.clone(),
            id,
            provider: provider.into(),
        }
    }
}

/// A judge pool entry as written in configuration files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSpec {
    pub id: JudgeId,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<JudgeSpec> for Judge {
    fn from(spec: JudgeSpec) -> Self {
        let model = spec.model.unwrap_or_else(|| spec.id.clone());
        let provider = spec
            .provider
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| provider_for_model(&model));
        Self {
            id: spec.id,
            provider,
            model,
        }
    }
}

/// Known short model names and their providers.
const PROVIDER_MAP: &[(&str, &str)] = &[
    ("opus", "anthropic"),
    ("sonnet", "anthropic"),
    ("haiku", "anthropic"),
    ("claude", "anthropic"),
    ("gpt", "openai"),
    ("o3", "openai"),
    ("o4", "openai"),
    ("gemini", "google"),
    ("kimi", "moonshot"),
    ("grok", "xai"),
    ("glm", "zhipu"),
    ("deepseek", "deepseek"),
    ("qwen", "alibaba"),
    ("llama", "meta"),
    ("mistral", "mistral"),
];

/// Derive a provider name from a model id.
///
/// Routed ids ("anthropic/claude-opus-4") use the vendor prefix. Bare ids go
/// through the known-name table, then fall back to the text before the first '-'.
pub fn provider_for_model(model: &str) -> String {
    let model = model.trim().to_lowercase();
    if let Some((vendor, _)) = model.split_once('/') {
        if !vendor.is_empty() {
            return vendor.to_string();
        }
    }
    let family = model.split(['-', '.', '_']).next().unwrap_or(&model);
    for (prefix, provider) in PROVIDER_MAP {
        if family.starts_with(prefix) {
            return (*provider).to_string();
        }
    }
    family.to_string()
}

// =============================================================================
// Calibration items
// =============================================================================

/// Known relative quality of a reference item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[serde(alias = "H", alias = "h")]
    High,
    #[serde(alias = "M", alias = "m")]
    Mid,
    #[serde(alias = "L", alias = "l")]
    Low,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Mid, Tier::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Mid => "mid",
            Tier::Low => "low",
        }
    }
}

/// Reference item used only during calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationItem {
    #[serde(alias = "id")]
    pub item_id: String,
    pub text: String,
    pub true_tier: Tier,
}

// =============================================================================
// Matches
// =============================================================================

/// Which candidate was shown in the first slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentedOrder {
    AFirst,
    BFirst,
}

impl PresentedOrder {
    pub fn from_a_first(a_first: bool) -> Self {
        if a_first {
            PresentedOrder::AFirst
        } else {
            PresentedOrder::BFirst
        }
    }

    /// `pos(candidate_a)`: +1 when `candidate_a` was shown first, else -1.
    pub fn pos_a(self) -> f64 {
        match self {
            PresentedOrder::AFirst => 1.0,
            PresentedOrder::BFirst => -1.0,
        }
    }
}

/// Slot label used in the judge prompt and verdict. "A" is always the first-shown slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotLabel {
    A,
    B,
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotLabel::A => f.write_str("A"),
            SlotLabel::B => f.write_str("B"),
        }
    }
}

/// One judge's verdict on one pair. Immutable once logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Per-call id, e.g. `R2-M03-J1`.
    pub match_id: String,
    pub round: u32,
    pub candidate_a: CandidateId,
    pub candidate_b: CandidateId,
    pub judge: JudgeId,
    pub presented_order: PresentedOrder,
    pub winner: CandidateId,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: String,
}

impl MatchRecord {
    pub fn a_won(&self) -> bool {
        self.winner == self.candidate_a
    }

    pub fn loser(&self) -> &str {
        if self.a_won() {
            &self.candidate_b
        } else {
            &self.candidate_a
        }
    }

    /// A record is usable when it pairs two distinct candidates and names one of them as winner.
    pub fn is_well_formed(&self) -> bool {
        self.candidate_a != self.candidate_b
            && (self.winner == self.candidate_a || self.winner == self.candidate_b)
    }
}

/// Map a slot label back to the candidate shown in that slot.
pub fn winner_for_label<'a>(
    order: PresentedOrder,
    label: SlotLabel,
    candidate_a: &'a str,
    candidate_b: &'a str,
) -> &'a str {
    match (order, label) {
        (PresentedOrder::AFirst, SlotLabel::A) | (PresentedOrder::BFirst, SlotLabel::B) => {
            candidate_a
        }
        _ => candidate_b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_for_routed_and_bare_models() {
        assert_eq!(provider_for_model("anthropic/claude-opus-4"), "anthropic");
        assert_eq!(provider_for_model("opus"), "anthropic");
        assert_eq!(provider_for_model("gpt-5.2"), "openai");
        assert_eq!(provider_for_model("gpt-5.3-codex"), "openai");
        assert_eq!(provider_for_model("gemini-3-pro"), "google");
        assert_eq!(provider_for_model("kimi-2.5"), "moonshot");
        assert_eq!(provider_for_model("acme-large"), "acme");
    }

    #[test]
    fn test_winner_for_label_respects_order() {
        assert_eq!(winner_for_label(PresentedOrder::AFirst, SlotLabel::A, "x", "y"), "x");
        assert_eq!(winner_for_label(PresentedOrder::BFirst, SlotLabel::A, "x", "y"), "y");
        assert_eq!(winner_for_label(PresentedOrder::BFirst, SlotLabel::B, "x", "y"), "x");
    }

    #[test]
    fn test_judge_spec_derives_provider() {
        let judge: Judge = JudgeSpec {
            id: "j1".into(),
            provider: None,
            model: Some("google/gemini-3-pro".into()),
        }
        .into();
        assert_eq!(judge.provider, "google");
        assert_eq!(judge.model, "google/gemini-3-pro");
    }

    #[test]
    fn test_tier_accepts_short_aliases() {
        let tier: Tier = serde_json::from_str("\"H\"").unwrap();
        assert_eq!(tier, Tier::High);
        let tier: Tier = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(tier, Tier::Low);
    }
}
