//! Greedy portfolio selection under taxonomy quotas and a redundancy penalty.
//!
//! ```text
//! RWEA2(i | S) = mu_i - lambda_u*sigma_i + lambda_E*E_i - lambda_risk*R_i - lambda_red*red(i, S)
//! red(i, S)    = max_{s in S} cos(i, s) + taxonomy_penalty * |{s in S sharing a label with i}|
//! ```
//!
//! One greedy trace produces the top-1, top-3 and top-5 tiers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::bradley_terry::RatingReport;
use crate::model::Candidate;
use crate::similarity::TfIdfIndex;

/// Gains closer than this are treated as equal.
const GAIN_TIE: f64 = 1e-12;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("invalid portfolio config: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------
//  Config
// ---------------------------------------------------------------------

/// Per-category caps. Accepts `{tag: max}` or `{categories, default_max, min_coverage}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "QuotaInput")]
pub struct QuotaTable {
    pub categories: BTreeMap<String, usize>,
    /// Cap for labels missing from `categories`. Unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max: Option<usize>,
    /// Minimum distinct labels the selection should cover.
    #[serde(default)]
    pub min_coverage: usize,
}

const RESERVED_QUOTA_KEYS: [&str; 3] = ["categories", "default_max", "min_coverage"];

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FullQuotaInput {
    #[serde(default)]
    categories: BTreeMap<String, usize>,
    #[serde(default)]
    default_max: Option<usize>,
    #[serde(default)]
    min_coverage: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuotaInput {
    Full(FullQuotaInput),
    Flat(BTreeMap<String, usize>),
}

impl TryFrom<QuotaInput> for QuotaTable {
    type Error = String;

    fn try_from(input: QuotaInput) -> Result<Self, Self::Error> {
        match input {
            QuotaInput::Full(full) => Ok(QuotaTable {
                categories: full.categories,
                default_max: full.default_max,
                min_coverage: full.min_coverage,
            }),
            QuotaInput::Flat(categories) => {
                if let Some(key) = RESERVED_QUOTA_KEYS.iter().find(|k| categories.contains_key(**k)) {
                    return Err(format!(
                        "'{key}' cannot be mixed with bare category caps; nest the caps under \"categories\""
                    ));
                }
                Ok(QuotaTable {
                    categories,
                    default_max: None,
                    min_coverage: 0,
                })
            }
        }
    }
}

impl QuotaTable {
    pub fn cap(&self, label: &str) -> Option<usize> {
        self.categories.get(label).copied().or(self.default_max)
    }

    /// First label of `candidate` whose cap is already reached by `selected`.
    fn blocking_label<'c>(&self, candidate: &'c Candidate, selected: &[&Candidate]) -> Option<&'c str> {
        candidate.taxonomy_labels.iter().map(String::as_str).find(|label| {
            self.cap(label).is_some_and(|cap| {
                selected
                    .iter()
                    .filter(|s| s.taxonomy_labels.contains(*label))
                    .count()
                    >= cap
            })
        })
    }
}

/// Qualitative evidence and risk flags for one candidate, both default 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceFlags {
    pub evidence: f64,
    pub risk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    /// Default: 5
    pub target_size: usize,
    /// Uncertainty penalty. Default: 0.3
    pub lambda_u: f64,
    /// Evidence bonus. Default: 0.1
    pub lambda_e: f64,
    /// Risk penalty. Default: 0.2
    pub lambda_risk: f64,
    /// Redundancy penalty. Default: 0.4
    pub lambda_red: f64,
    /// Added to `red` per selected item sharing a label. Default: 0.1
    pub taxonomy_penalty: f64,
    /// Cosine similarity that marks a pick or exclusion as redundant. Default: 0.40
    pub redundancy_alert: f64,
    /// Selection stops early when the best gain falls below this. Gains sit on the
    /// sum-zero theta scale, so no floor is applied unless one is set. Default: None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_marginal_gain: Option<f64>,
    pub quotas: QuotaTable,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            target_size: 5,
            lambda_u: 0.3,
            lambda_e: 0.1,
            lambda_risk: 0.2,
            lambda_red: 0.4,
            taxonomy_penalty: 0.1,
            redundancy_alert: 0.40,
            min_marginal_gain: None,
            quotas: QuotaTable::default(),
        }
    }
}

impl PortfolioConfig {
    pub fn validate(&self) -> Result<(), PortfolioError> {
        if self.target_size == 0 {
            return Err(PortfolioError::InvalidConfig("target_size must be at least 1".into()));
        }
        for (name, value) in [
            ("lambda_u", self.lambda_u),
            ("lambda_e", self.lambda_e),
            ("lambda_risk", self.lambda_risk),
            ("lambda_red", self.lambda_red),
            ("taxonomy_penalty", self.taxonomy_penalty),
        ] {
            if !(value >= 0.0) {
                return Err(PortfolioError::InvalidConfig(format!("{name} must be non-negative")));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
//  Output
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedCandidate {
    pub id: String,
    /// 1-based pick order.
    pub position: usize,
    pub mu: f64,
    pub sigma: f64,
    pub evidence: f64,
    pub risk: f64,
    pub base_score: f64,
    /// `red(i, S)` at the moment of selection.
    pub redundancy: f64,
    pub marginal_gain: f64,
    pub nearest: Option<String>,
    pub nearest_similarity: f64,
    pub taxonomy_labels: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    QuotaReached,
    InsufficientEvidence,
    Redundant,
    BelowCutoff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub id: String,
    pub reason: ExclusionReason,
    pub detail: String,
}

/// Cached similarity of an unselected candidate to the selection so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedundancyEntry {
    pub max_similarity: f64,
    pub nearest: Option<String>,
    pub shared_label_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopPick {
    pub id: String,
    pub reason: String,
    /// Candidates whose intervals overlap the top candidate's.
    pub co_leaders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSelection {
    /// Greedy pick order.
    pub selected: Vec<SelectedCandidate>,
    pub top_1: Option<TopPick>,
    pub top_3: Vec<String>,
    pub top_5: Vec<String>,
    pub excluded: Vec<Exclusion>,
    pub redundancy: BTreeMap<String, RedundancyEntry>,
    pub coverage: BTreeMap<String, usize>,
    pub coverage_met: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PortfolioSelection {
    pub fn ids(&self) -> Vec<String> {
        self.selected.iter().map(|s| s.id.clone()).collect()
    }
}

// ---------------------------------------------------------------------
//  Selection
// ---------------------------------------------------------------------

struct Entry<'a> {
    candidate: &'a Candidate,
    mu: f64,
    sigma: f64,
    flags: EvidenceFlags,
    base: f64,
}

/// Select a portfolio from rated candidates.
///
/// Only ranked candidates are eligible. Candidates the estimator left unranked are
/// logged as insufficient evidence, separately from ranked candidates that lost.
pub fn optimize(
    ratings: &RatingReport,
    candidates: &[Candidate],
    flags: &BTreeMap<String, EvidenceFlags>,
    config: &PortfolioConfig,
) -> Result<PortfolioSelection, PortfolioError> {
    config.validate()?;
    let mut warnings = Vec::new();
    let mut excluded = Vec::new();

    let by_id: BTreeMap<&str, &Candidate> = candidates.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut entries: Vec<Entry<'_>> = Vec::new();
    for r in &ratings.ranked {
        let Some(candidate) = by_id.get(r.id.as_str()) else {
            warn!(candidate = %r.id, "rated candidate missing from the pool, skipping");
            continue;
        };
        let f = flags.get(&r.id).copied().unwrap_or_default();
        let base = r.mu - config.lambda_u * r.sigma + config.lambda_e * f.evidence
            - config.lambda_risk * f.risk;
        entries.push(Entry {
            candidate,
            mu: r.mu,
            sigma: r.sigma,
            flags: f,
            base,
        });
    }
    let ranked_ids: BTreeSet<&str> = ratings.ranked.iter().map(|r| r.id.as_str()).collect();
    for c in candidates {
        if ranked_ids.contains(c.id.as_str()) {
            continue;
        }
        let detail = ratings
            .insufficient
            .iter()
            .find(|i| i.id == c.id)
            .map(|i| i.reason.clone())
            .unwrap_or_else(|| "not rated".to_string());
        excluded.push(Exclusion {
            id: c.id.clone(),
            reason: ExclusionReason::InsufficientEvidence,
            detail,
        });
    }

    let index = TfIdfIndex::build(
        entries
            .iter()
            .map(|e| (e.candidate.id.as_str(), e.candidate.text.as_str())),
    );

    let mut redundancy: BTreeMap<String, RedundancyEntry> = entries
        .iter()
        .map(|e| (e.candidate.id.clone(), RedundancyEntry::default()))
        .collect();
    let mut selected: Vec<SelectedCandidate> = Vec::new();
    let mut chosen: Vec<&Candidate> = Vec::new();
    let mut remaining: Vec<usize> = (0..entries.len()).collect();

    let red_of = |state: &RedundancyEntry| {
        state.max_similarity + config.taxonomy_penalty * state.shared_label_count as f64
    };

    while selected.len() < config.target_size {
        let mut best: Option<(usize, f64, f64)> = None;
        for (pos, &i) in remaining.iter().enumerate() {
            let entry = &entries[i];
            if config.quotas.blocking_label(entry.candidate, &chosen).is_some() {
                continue;
            }
            let state = redundancy.get(&entry.candidate.id).cloned().unwrap_or_default();
            let gain = entry.base - config.lambda_red * red_of(&state);
            let better = match best {
                None => true,
                Some((bpos, bgain, _)) => {
                    let bentry = &entries[remaining[bpos]];
                    if (gain - bgain).abs() > GAIN_TIE {
                        gain > bgain
                    } else if (entry.base - bentry.base).abs() > GAIN_TIE {
                        entry.base > bentry.base
                    } else {
                        entry.candidate.id < bentry.candidate.id
                    }
                }
            };
            if better {
                best = Some((pos, gain, red_of(&state)));
            }
        }
        let Some((pos, gain, red)) = best else {
            break;
        };
        if !selected.is_empty() && config.min_marginal_gain.is_some_and(|floor| gain < floor) {
            break;
        }

        let i = remaining.remove(pos);
        let entry = &entries[i];
        let state = redundancy.get(&entry.candidate.id).cloned().unwrap_or_default();
        if state.max_similarity > config.redundancy_alert {
            let message = format!(
                "{} selected despite similarity {:.2} to {}",
                entry.candidate.id,
                state.max_similarity,
                state.nearest.as_deref().unwrap_or("?")
            );
            warn!("{message}");
            warnings.push(message);
        }
        selected.push(SelectedCandidate {
            id: entry.candidate.id.clone(),
            position: selected.len() + 1,
            mu: entry.mu,
            sigma: entry.sigma,
            evidence: entry.flags.evidence,
            risk: entry.flags.risk,
            base_score: entry.base,
            redundancy: red,
            marginal_gain: gain,
            nearest: state.nearest.clone(),
            nearest_similarity: state.max_similarity,
            taxonomy_labels: entry.candidate.taxonomy_labels.clone(),
        });
        chosen.push(entry.candidate);

        for &j in &remaining {
            let other = entries[j].candidate;
            let Some(cache) = redundancy.get_mut(&other.id) else {
                continue;
            };
            let sim = index.cosine(&other.id, &entry.candidate.id);
            if sim > cache.max_similarity {
                cache.max_similarity = sim;
                cache.nearest = Some(entry.candidate.id.clone());
            }
            if !other.taxonomy_labels.is_disjoint(&entry.candidate.taxonomy_labels) {
                cache.shared_label_count += 1;
            }
        }
    }

    let cutoff = selected.last().map(|s| s.marginal_gain);
    for &i in &remaining {
        let entry = &entries[i];
        let state = redundancy.get(&entry.candidate.id).cloned().unwrap_or_default();
        let (reason, detail) = if let Some(label) = config.quotas.blocking_label(entry.candidate, &chosen) {
            (ExclusionReason::QuotaReached, format!("quota reached for '{label}'"))
        } else if state.max_similarity > config.redundancy_alert {
            (
                ExclusionReason::Redundant,
                format!(
                    "similarity {:.2} to {}",
                    state.max_similarity,
                    state.nearest.as_deref().unwrap_or("?")
                ),
            )
        } else {
            let gain = entry.base - config.lambda_red * red_of(&state);
            let detail = match cutoff {
                Some(c) => format!("marginal gain {gain:.4} below selected cutoff {c:.4}"),
                None => format!("marginal gain {gain:.4}"),
            };
            (ExclusionReason::BelowCutoff, detail)
        };
        excluded.push(Exclusion {
            id: entry.candidate.id.clone(),
            reason,
            detail,
        });
    }

    let mut coverage: BTreeMap<String, usize> = BTreeMap::new();
    for c in &chosen {
        for label in &c.taxonomy_labels {
            *coverage.entry(label.clone()).or_insert(0) += 1;
        }
    }
    let coverage_met = coverage.len() >= config.quotas.min_coverage;
    if !coverage_met {
        let message = format!(
            "selection covers {} categories, fewer than the minimum of {}",
            coverage.len(),
            config.quotas.min_coverage
        );
        warn!("{message}");
        warnings.push(message);
    }

    let top_1 = selected.first().map(|first| {
        let co_leaders: Vec<String> = ratings
            .leaders
            .iter()
            .filter(|id| **id != first.id)
            .cloned()
            .collect();
        let reason = if co_leaders.is_empty() {
            format!("highest marginal gain {:.4} (mu {:.4})", first.marginal_gain, first.mu)
        } else {
            format!(
                "highest marginal gain {:.4}; intervals overlap {} other candidate(s), so the lead is not statistically distinguishable",
                first.marginal_gain,
                co_leaders.len()
            )
        };
        TopPick {
            id: first.id.clone(),
            reason,
            co_leaders,
        }
    });
    let prefix = |n: usize| selected.iter().take(n).map(|s| s.id.clone()).collect::<Vec<_>>();

    info!(selected = selected.len(), excluded = excluded.len(), "portfolio built");
    Ok(PortfolioSelection {
        top_3: prefix(3),
        top_5: prefix(5),
        top_1,
        selected,
        excluded,
        redundancy,
        coverage,
        coverage_met,
        warnings,
    })
}
