//! Thompson-sampling feedback over generation channels.
//!
//! Each channel is a Bernoulli arm with a Beta(successes + 1, failures + 1)
//! posterior kept in the [`ChannelLedger`]. At the end of a run the current
//! posteriors are sampled to weight the next run's generation mix, then this
//! run's outcomes are added to the counts.

use std::collections::BTreeMap;

use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Beta;
use tracing::{info, warn};

use crate::bradley_terry::RatingReport;
use crate::channel::Channel;
use crate::ledger::{ChannelLedger, LedgerError, LedgerStore};
use crate::model::Candidate;

pub const REASON_TOURNAMENT_BOTTOM: &str = "tournament_bottom";
pub const REASON_INSUFFICIENT_EVIDENCE: &str = "insufficient_evidence";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Success means finishing in the top `q` share of ranked candidates. Default: 0.5
    pub top_q: f64,
    /// Minimum next-run weight per channel, capped at `1 / channels`. Default: 0.10
    pub exploration_floor: f64,
    /// Seed for posterior sampling.
    pub seed: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            top_q: 0.5,
            exploration_floor: 0.10,
            seed: 0,
        }
    }
}

/// What happened to one generated candidate this run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutcome {
    pub candidate_id: String,
    pub channel: Channel,
    pub gates_passed: bool,
    #[serde(default)]
    pub failed_gates: Vec<String>,
    /// 1-based tournament rank among ranked candidates.
    #[serde(default)]
    pub rank: Option<usize>,
    /// `1 - (rank - 1) / (ranked - 1)`; 1.0 is the best.
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub insufficient_evidence: bool,
}

impl CandidateOutcome {
    /// `Ok` on success, otherwise the failure reasons.
    pub fn classify(&self, top_q: f64) -> Result<(), Vec<String>> {
        if !self.gates_passed {
            let reasons = if self.failed_gates.is_empty() {
                vec!["gates".to_string()]
            } else {
                self.failed_gates.clone()
            };
            return Err(reasons);
        }
        match self.percentile {
            Some(p) if p >= 1.0 - top_q => Ok(()),
            Some(_) => Err(vec![REASON_TOURNAMENT_BOTTOM.to_string()]),
            None => Err(vec![REASON_INSUFFICIENT_EVIDENCE.to_string()]),
        }
    }
}

/// Build outcomes for channel-tagged candidates.
///
/// `failed_gates` maps candidate ids to the mechanical gates they failed; a candidate
/// missing from it passed every gate. Candidates without an origin channel are skipped.
pub fn outcomes_from_ratings(
    candidates: &[Candidate],
    ratings: &RatingReport,
    failed_gates: &BTreeMap<String, Vec<String>>,
) -> Vec<CandidateOutcome> {
    let ranked = ratings.ranked.len();
    candidates
        .iter()
        .filter_map(|c| {
            let channel = c.origin_channel?;
            let failed = failed_gates.get(&c.id).cloned().unwrap_or_default();
            let rank = ratings.get(&c.id).map(|r| r.rank);
            let percentile = rank.map(|r| {
                if ranked <= 1 {
                    1.0
                } else {
                    1.0 - (r as f64 - 1.0) / (ranked as f64 - 1.0)
                }
            });
            Some(CandidateOutcome {
                candidate_id: c.id.clone(),
                channel,
                gates_passed: failed.is_empty(),
                failed_gates: failed,
                rank,
                percentile,
                insufficient_evidence: rank.is_none(),
            })
        })
        .collect()
}

/// Lift every weight to at least `floor` (capped at `1 / n`) and renormalize.
///
/// Channels below the floor are pinned to it; the remaining mass is shared by the
/// others in proportion to their weights, repeating until nothing falls below.
pub fn apply_floor(weights: &BTreeMap<Channel, f64>, floor: f64) -> BTreeMap<Channel, f64> {
    let n = weights.len();
    if n == 0 {
        return BTreeMap::new();
    }
    let floor = floor.clamp(0.0, 1.0 / n as f64);
    let total: f64 = weights.values().filter(|w| w.is_finite() && **w > 0.0).sum();
    let mut out: BTreeMap<Channel, f64> = if total > 0.0 {
        weights
            .iter()
            .map(|(c, w)| (*c, if w.is_finite() { w.max(0.0) / total } else { 0.0 }))
            .collect()
    } else {
        weights.keys().map(|c| (*c, 1.0 / n as f64)).collect()
    };

    let mut pinned: BTreeMap<Channel, bool> = out.keys().map(|c| (*c, false)).collect();
    loop {
        let newly: Vec<Channel> = out
            .iter()
            .filter(|(c, w)| !pinned[*c] && **w < floor)
            .map(|(c, _)| *c)
            .collect();
        if newly.is_empty() {
            break;
        }
        for c in newly {
            pinned.insert(c, true);
        }
        let pinned_count = pinned.values().filter(|p| **p).count();
        let free_mass = 1.0 - floor * pinned_count as f64;
        let free_total: f64 = out.iter().filter(|(c, _)| !pinned[*c]).map(|(_, w)| *w).sum();
        let free_count = n - pinned_count;
        for (c, w) in out.iter_mut() {
            if pinned[c] {
                *w = floor;
            } else if free_total > 0.0 {
                *w = *w / free_total * free_mass;
            } else {
                *w = free_mass / free_count.max(1) as f64;
            }
        }
    }
    out
}

/// One Thompson draw per channel from the ledger's current posteriors.
pub fn sample_weights(ledger: &ChannelLedger, channels: &[Channel], rng: &mut StdRng) -> BTreeMap<Channel, f64> {
    channels
        .iter()
        .map(|c| {
            let (a, b) = ledger.record(*c).beta_params();
            let draw = match Beta::new(a, b) {
                Ok(beta) => beta.sample(&mut *rng),
                Err(e) => {
                    warn!(channel = %c, error = %e, "invalid beta parameters, using posterior mean");
                    a / (a + b)
                }
            };
            (*c, draw)
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelTally {
    pub successes: u64,
    pub failures: u64,
    pub failure_reasons: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReport {
    /// Generation mix for the next run; sums to 1.
    pub next_weights: BTreeMap<Channel, f64>,
    /// Raw Thompson draws before the floor.
    pub samples: BTreeMap<Channel, f64>,
    pub tallies: BTreeMap<Channel, ChannelTally>,
    pub posterior_mean_before: BTreeMap<Channel, f64>,
    pub posterior_mean_after: BTreeMap<Channel, f64>,
    pub recommendation: String,
    pub ledger: ChannelLedger,
}

/// Pure feedback step: sample from `ledger`, then fold `outcomes` into a copy of it.
pub fn plan_feedback(
    ledger: &ChannelLedger,
    outcomes: &[CandidateOutcome],
    config: &FeedbackConfig,
) -> FeedbackReport {
    let channels = Channel::ALL;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let samples = sample_weights(ledger, &channels, &mut rng);
    let next_weights = apply_floor(&samples, config.exploration_floor);

    let mut tallies: BTreeMap<Channel, ChannelTally> = BTreeMap::new();
    for outcome in outcomes {
        let tally = tallies.entry(outcome.channel).or_default();
        match outcome.classify(config.top_q) {
            Ok(()) => tally.successes += 1,
            Err(reasons) => {
                tally.failures += 1;
                for r in reasons {
                    *tally.failure_reasons.entry(r).or_insert(0) += 1;
                }
            }
        }
    }

    let mut updated = ledger.clone();
    for (channel, tally) in &tallies {
        let record = updated.record_mut(*channel);
        record.successes += tally.successes;
        record.failures += tally.failures;
        for (reason, n) in &tally.failure_reasons {
            *record.failure_reasons.entry(reason.clone()).or_insert(0) += n;
        }
    }

    let means = |l: &ChannelLedger| -> BTreeMap<Channel, f64> {
        channels.iter().map(|c| (*c, l.record(*c).posterior_mean())).collect()
    };
    let posterior_mean_before = means(ledger);
    let posterior_mean_after = means(&updated);
    let recommendation = recommend(&posterior_mean_after);

    FeedbackReport {
        next_weights,
        samples,
        tallies,
        posterior_mean_before,
        posterior_mean_after,
        recommendation,
        ledger: updated,
    }
}

fn recommend(means: &BTreeMap<Channel, f64>) -> String {
    let best = means.iter().max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(a.0)));
    let worst = means.iter().min_by(|a, b| a.1.total_cmp(b.1).then(a.0.cmp(b.0)));
    match (best, worst) {
        (Some((b, bm)), Some((w, wm))) if b != w && (bm - wm).abs() > 1e-12 => format!(
            "favour {b} (posterior mean {bm:.3}); deprioritise {w} (posterior mean {wm:.3})"
        ),
        _ => "no channel stands out yet; keep the mix balanced".to_string(),
    }
}

/// Locked read-modify-write of the ledger. A write failure is returned, never swallowed.
pub fn run_feedback(
    store: &LedgerStore,
    outcomes: &[CandidateOutcome],
    config: &FeedbackConfig,
) -> Result<FeedbackReport, LedgerError> {
    let mut report = None;
    let committed = store.update(|ledger| {
        let planned = plan_feedback(ledger, outcomes, config);
        *ledger = planned.ledger.clone();
        report = Some(planned);
    })?;
    let mut report = report.unwrap_or_else(|| plan_feedback(&committed, &[], config));
    report.ledger = committed;
    info!(
        outcomes = outcomes.len(),
        path = %store.path().display(),
        "channel ledger updated"
    );
    Ok(report)
}
