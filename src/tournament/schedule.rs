//! Round schedule: panel size per round band, escalation, early stop and field cuts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Informational model class for a round band. Drives the cost estimate only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Cheap,
    Mixed,
    Best,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Cheap => "cheap",
            ModelTier::Mixed => "mixed",
            ModelTier::Best => "best",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundBand {
    /// Judges per match.
    pub judges: usize,
    pub model_tier: ModelTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Escalation {
    pub enabled: bool,
    /// Judges added to a split panel.
    pub extra_judges: usize,
}

impl Default for Escalation {
    fn default() -> Self {
        Self {
            enabled: true,
            extra_judges: 1,
        }
    }
}

/// Stop calling a panel's remaining judges once the first `unanimous_at` agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStop {
    pub unanimous_at: Option<usize>,
    pub skip_remaining: bool,
}

impl Default for EarlyStop {
    fn default() -> Self {
        Self {
            unanimous_at: None,
            skip_remaining: true,
        }
    }
}

impl EarlyStop {
    /// Number of judges to call before checking for unanimity, if active.
    pub fn first_stage(&self, panel: usize) -> Option<usize> {
        match self.unanimous_at {
            Some(k) if self.skip_remaining && k >= 1 && k < panel => Some(k),
            _ => None,
        }
    }
}

/// Per-call unit cost for each model tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitCosts {
    pub cheap: f64,
    pub mixed: f64,
    pub best: f64,
}

impl Default for UnitCosts {
    fn default() -> Self {
        Self {
            cheap: 0.02,
            mixed: 0.06,
            best: 0.12,
        }
    }
}

impl UnitCosts {
    pub fn for_tier(&self, tier: ModelTier) -> f64 {
        match tier {
            ModelTier::Cheap => self.cheap,
            ModelTier::Mixed => self.mixed,
            ModelTier::Best => self.best,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// Default: 6
    pub rounds: u32,
    /// Default: 1 judge, cheap
    pub rounds_1_to_3: RoundBand,
    /// Default: 2 judges, mixed
    pub rounds_4_to_5: RoundBand,
    /// Default: 3 judges, best
    pub round_6_plus: RoundBand,
    pub escalation: Escalation,
    pub early_stop: EarlyStop,
    /// `{after_round: field_size}`. Keys are round numbers as strings in JSON.
    pub field_cuts: BTreeMap<u32, usize>,
    pub unit_costs: UnitCosts,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            rounds: 6,
            rounds_1_to_3: RoundBand {
                judges: 1,
                model_tier: ModelTier::Cheap,
            },
            rounds_4_to_5: RoundBand {
                judges: 2,
                model_tier: ModelTier::Mixed,
            },
            round_6_plus: RoundBand {
                judges: 3,
                model_tier: ModelTier::Best,
            },
            escalation: Escalation::default(),
            early_stop: EarlyStop::default(),
            field_cuts: BTreeMap::new(),
            unit_costs: UnitCosts::default(),
        }
    }
}

impl Schedule {
    /// Band for a 1-based round number.
    pub fn band(&self, round: u32) -> &RoundBand {
        match round {
            0..=3 => &self.rounds_1_to_3,
            4 | 5 => &self.rounds_4_to_5,
            _ => &self.round_6_plus,
        }
    }

    /// Largest base panel any scheduled round asks for.
    pub fn max_panel(&self) -> usize {
        (1..=self.rounds.max(1))
            .map(|r| self.band(r).judges)
            .max()
            .unwrap_or(1)
    }

    /// Largest panel any scheduled round can reach once a split escalates.
    pub fn max_escalated_panel(&self) -> usize {
        let extra = if self.escalation.enabled {
            self.escalation.extra_judges
        } else {
            0
        };
        self.max_panel() + extra
    }

    /// Field size to cut to after `round`, if a cut is configured.
    pub fn cut_after(&self, round: u32) -> Option<usize> {
        self.field_cuts.get(&round).copied()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.rounds == 0 {
            return Err("rounds must be at least 1".into());
        }
        for (name, band) in [
            ("rounds_1_to_3", &self.rounds_1_to_3),
            ("rounds_4_to_5", &self.rounds_4_to_5),
            ("round_6_plus", &self.round_6_plus),
        ] {
            if band.judges == 0 {
                return Err(format!("{name}.judges must be at least 1"));
            }
        }
        if let Some((round, size)) = self.field_cuts.iter().find(|(_, size)| **size < 2) {
            return Err(format!("field cut after round {round} to {size} leaves no pairings"));
        }
        Ok(())
    }
}
