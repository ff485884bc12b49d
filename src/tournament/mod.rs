//! Swiss tournament over a fixed candidate pool.
//!
//! Each round ranks the live field, pairs it, draws every random decision for the
//! round (judge shuffle, A/B placement, tie coins) and only then issues the judge
//! calls concurrently. Results are applied in pairing order, so the match log is
//! identical for the same inputs and seed however the calls interleave.

pub mod bout;
pub mod pairing;
pub mod schedule;

use std::collections::BTreeSet;

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::judge::{CallPolicy, JudgeOracle, PairSide, DEFAULT_CRITERION};
use crate::model::{Candidate, Judge, MatchRecord, PresentedOrder};
use crate::trace::{AuditEvent, AuditSink};

pub use bout::{run_bout, BoutContext, BoutOutcome, BoutPlan};
pub use pairing::{pair_round, RoundPairing, Standing, Standings};
pub use schedule::{EarlyStop, Escalation, ModelTier, RoundBand, Schedule, UnitCosts};

#[derive(Debug, Error)]
pub enum TournamentError {
    #[error("a tournament needs at least 2 candidates, got {0}")]
    TooFewCandidates(usize),
    #[error("duplicate candidate id '{0}'")]
    DuplicateCandidate(String),
    #[error("no calibrated judges available")]
    NoJudges,
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TournamentConfig {
    /// Drives pairing tie-breaks, judge shuffles, A/B placement and tie coins.
    pub seed: u64,
    pub schedule: Schedule,
    pub criterion: String,
    /// Bouts judged at once within a round. Default: 8
    pub concurrency: usize,
    pub call_policy: CallPolicy,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            schedule: Schedule::default(),
            criterion: DEFAULT_CRITERION.to_string(),
            concurrency: 8,
            call_policy: CallPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoutSummary {
    pub match_id: String,
    pub candidate_a: String,
    pub candidate_b: String,
    pub winner: Option<String>,
    pub votes_a: usize,
    pub votes_b: usize,
    pub judges: Vec<String>,
    pub escalated: bool,
    pub tie_broken: bool,
    pub void: bool,
}

impl From<&BoutOutcome> for BoutSummary {
    fn from(b: &BoutOutcome) -> Self {
        Self {
            match_id: b.match_id.clone(),
            candidate_a: b.candidate_a.clone(),
            candidate_b: b.candidate_b.clone(),
            winner: b.winner.clone(),
            votes_a: b.votes_a,
            votes_b: b.votes_b,
            judges: b.judges.clone(),
            escalated: b.escalated,
            tie_broken: b.tie_broken,
            void: b.void,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub field_size: usize,
    pub panel_size: usize,
    pub model_tier: ModelTier,
    pub pairings: Vec<BoutSummary>,
    pub bye: Option<String>,
    /// Cut from the field after this round.
    pub eliminated: Vec<String>,
    pub judge_calls: usize,
    pub forced_rematches: usize,
    pub dropped_calls: usize,
    pub replacements: usize,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TournamentResult {
    pub seed: u64,
    pub rounds: Vec<RoundSummary>,
    /// Every candidate in final rank order.
    pub standings: Vec<Standing>,
    /// Candidates still in the field at the end.
    pub final_field: Vec<String>,
    /// Every valid judge call, in pairing order.
    pub matches: Vec<MatchRecord>,
    /// Dropped and replaced calls.
    pub audit: Vec<AuditEvent>,
    pub judges: Vec<String>,
    pub panel_cap: usize,
    pub total_calls: usize,
    pub estimated_cost: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn validate(candidates: &[Candidate], judges: &[Judge], config: &TournamentConfig) -> Result<(), TournamentError> {
    if candidates.len() < 2 {
        return Err(TournamentError::TooFewCandidates(candidates.len()));
    }
    let mut seen = BTreeSet::new();
    for c in candidates {
        if !seen.insert(c.id.as_str()) {
            return Err(TournamentError::DuplicateCandidate(c.id.clone()));
        }
    }
    if judges.is_empty() {
        return Err(TournamentError::NoJudges);
    }
    config
        .schedule
        .validate()
        .map_err(TournamentError::InvalidSchedule)
}

/// Run the full Swiss schedule. `judges` must already be the calibrated pool.
pub async fn run_tournament(
    oracle: &dyn JudgeOracle,
    candidates: &[Candidate],
    judges: &[Judge],
    config: &TournamentConfig,
    audit: Option<&dyn AuditSink>,
) -> Result<TournamentResult, TournamentError> {
    validate(candidates, judges, config)?;
    let schedule = &config.schedule;
    let mut warnings = Vec::new();

    let providers: BTreeSet<&str> = judges.iter().map(|j| j.provider.as_str()).collect();
    let panel_cap = providers.len();
    if schedule.max_panel() > panel_cap {
        let message = format!(
            "schedule asks for panels of {} but only {} distinct providers are available; panels capped at {}",
            schedule.max_panel(),
            panel_cap,
            panel_cap
        );
        warn!("{message}");
        warnings.push(message);
    } else if schedule.max_escalated_panel() > panel_cap {
        let message = format!(
            "escalation can grow panels to {} but only {} distinct providers are available; escalated panels capped at {}",
            schedule.max_escalated_panel(),
            panel_cap,
            panel_cap
        );
        warn!("{message}");
        warnings.push(message);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut standings = Standings::new(candidates.iter().map(|c| (c.id.clone(), rng.gen::<u64>())));
    let texts: std::collections::BTreeMap<&str, &str> = candidates
        .iter()
        .map(|c| (c.id.as_str(), c.text.as_str()))
        .collect();
    let side = |id: &str| PairSide::new(id, texts.get(id).copied().unwrap_or_default());

    let ctx = BoutContext {
        oracle,
        criterion: &config.criterion,
        policy: &config.call_policy,
        escalation: &schedule.escalation,
        early_stop: &schedule.early_stop,
    };

    let mut field: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
    let mut rounds = Vec::new();
    let mut matches = Vec::new();
    let mut audit_log = Vec::new();

    for round in 1..=schedule.rounds {
        if field.len() < 2 {
            break;
        }
        let ranked = standings.rank(&field);
        let pairing = pair_round(&ranked, &standings);
        if pairing.forced_rematches > 0 {
            warn!(round, forced = pairing.forced_rematches, "rematches could not be avoided");
        }
        let band = schedule.band(round);
        let panel = band.judges.min(panel_cap).max(1);

        let plans: Vec<BoutPlan> = pairing
            .pairs
            .iter()
            .enumerate()
            .map(|(m, (a, b))| {
                let mut judge_order = judges.to_vec();
                judge_order.shuffle(&mut rng);
                let orders = (0..judge_order.len())
                    .map(|_| PresentedOrder::from_a_first(rng.gen_bool(0.5)))
                    .collect();
                BoutPlan {
                    match_id: format!("R{round}-M{:02}", m + 1),
                    round,
                    candidate_a: side(a),
                    candidate_b: side(b),
                    judge_order,
                    orders,
                    tie_coin: rng.gen_bool(0.5),
                    panel,
                }
            })
            .collect();

        let ctx_ref = &ctx;
        let mut outcomes: Vec<(usize, BoutOutcome)> = stream::iter(plans.iter().enumerate())
            .map(|(i, plan)| async move { (i, run_bout(ctx_ref, plan).await) })
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(i, _)| *i);

        if let Some(id) = &pairing.bye {
            standings.record_bye(id);
        }
        let mut summary = RoundSummary {
            round,
            field_size: field.len(),
            panel_size: panel,
            model_tier: band.model_tier,
            pairings: Vec::with_capacity(outcomes.len()),
            bye: pairing.bye.clone(),
            eliminated: Vec::new(),
            judge_calls: 0,
            forced_rematches: pairing.forced_rematches,
            dropped_calls: 0,
            replacements: 0,
            estimated_cost: 0.0,
        };
        for (_, outcome) in outcomes {
            standings.record_pairing(&outcome.candidate_a, &outcome.candidate_b);
            if let Some(winner) = &outcome.winner {
                let loser = if *winner == outcome.candidate_a {
                    &outcome.candidate_b
                } else {
                    &outcome.candidate_a
                };
                standings.record_result(winner, loser);
            }
            summary.judge_calls += outcome.judges.len();
            summary.dropped_calls += outcome.dropped_calls;
            summary.replacements += outcome.replacements;
            summary.pairings.push(BoutSummary::from(&outcome));
            for event in &outcome.audit {
                if let Some(sink) = audit {
                    if let Err(e) = sink.record(event.clone()) {
                        warn!(error = %e, "failed to record audit event");
                    }
                }
            }
            matches.extend(outcome.records);
            audit_log.extend(outcome.audit);
        }
        summary.estimated_cost =
            summary.judge_calls as f64 * schedule.unit_costs.for_tier(band.model_tier);

        if let Some(size) = schedule.cut_after(round).filter(|size| *size < field.len()) {
            let ranked = standings.rank(&field);
            summary.eliminated = ranked[size..].to_vec();
            field = ranked[..size].to_vec();
            info!(round, kept = size, cut = summary.eliminated.len(), "field cut");
        }
        info!(
            round,
            pairings = summary.pairings.len(),
            calls = summary.judge_calls,
            dropped = summary.dropped_calls,
            "round complete"
        );
        rounds.push(summary);
    }

    let total_calls = rounds.iter().map(|r| r.judge_calls).sum();
    let estimated_cost = rounds.iter().map(|r| r.estimated_cost).sum();
    Ok(TournamentResult {
        seed: config.seed,
        rounds,
        standings: standings.ranked(),
        final_field: standings.rank(&field),
        matches,
        audit: audit_log,
        judges: judges.iter().map(|j| j.id.clone()).collect(),
        panel_cap,
        total_calls,
        estimated_cost,
        warnings,
    })
}
