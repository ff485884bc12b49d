//! One Swiss pairing judged by a provider-distinct panel.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::schedule::{EarlyStop, Escalation};
use crate::judge::{judge_pair, CallPolicy, CallStatus, JudgeOracle, PairRequest, PairSide};
use crate::model::{winner_for_label, Judge, MatchRecord, PresentedOrder};
use crate::trace::AuditEvent;

/// Everything random about a bout, drawn before any call is made.
#[derive(Debug, Clone)]
pub struct BoutPlan {
    /// `R{r}-M{nn}`.
    pub match_id: String,
    pub round: u32,
    pub candidate_a: PairSide,
    pub candidate_b: PairSide,
    /// Shuffled judge pool; judges are taken from the front.
    pub judge_order: Vec<Judge>,
    /// Presentation order for the k-th call (index k - 1).
    pub orders: Vec<PresentedOrder>,
    /// Winner of a tied panel: `true` means candidate A.
    pub tie_coin: bool,
    pub panel: usize,
}

impl BoutPlan {
    fn request(&self, k: usize, criterion: &str) -> PairRequest {
        PairRequest {
            match_id: format!("{}-J{k}", self.match_id),
            criterion: criterion.to_string(),
            candidate_a: self.candidate_a.clone(),
            candidate_b: self.candidate_b.clone(),
            order: self
                .orders
                .get(k.saturating_sub(1))
                .copied()
                .unwrap_or(PresentedOrder::AFirst),
        }
    }
}

pub struct BoutContext<'a> {
    pub oracle: &'a dyn JudgeOracle,
    pub criterion: &'a str,
    pub policy: &'a CallPolicy,
    pub escalation: &'a Escalation,
    pub early_stop: &'a EarlyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoutOutcome {
    pub match_id: String,
    pub round: u32,
    pub candidate_a: String,
    pub candidate_b: String,
    /// `None` when the bout is void.
    pub winner: Option<String>,
    pub votes_a: usize,
    pub votes_b: usize,
    /// Judges assigned, replacements included, in call order.
    pub judges: Vec<String>,
    pub escalated: bool,
    pub tie_broken: bool,
    pub void: bool,
    pub records: Vec<MatchRecord>,
    pub audit: Vec<AuditEvent>,
    pub dropped_calls: usize,
    pub replacements: usize,
}

/// Hands out judges from the plan, one per provider.
struct Panel<'p> {
    plan: &'p BoutPlan,
    next: usize,
    providers: BTreeSet<&'p str>,
    assigned: usize,
}

impl<'p> Panel<'p> {
    fn new(plan: &'p BoutPlan) -> Self {
        Self {
            plan,
            next: 0,
            providers: BTreeSet::new(),
            assigned: 0,
        }
    }

    /// Next judge whose provider is not yet on this bout, with its call index.
    fn assign(&mut self) -> Option<(usize, &'p Judge)> {
        while let Some(judge) = self.plan.judge_order.get(self.next) {
            self.next += 1;
            if self.providers.insert(judge.provider.as_str()) {
                self.assigned += 1;
                return Some((self.assigned, judge));
            }
        }
        None
    }
}

struct Tally<'p> {
    panel: Panel<'p>,
    outcome: BoutOutcome,
}

impl<'p> Tally<'p> {
    fn votes(&self) -> (usize, usize) {
        let a = self.outcome.records.iter().filter(|r| r.a_won()).count();
        (a, self.outcome.records.len() - a)
    }

    /// Call `n` fresh judges; timed-out calls are replaced until the pool runs dry.
    /// Returns how many judges were assigned.
    async fn call_stage(&mut self, ctx: &BoutContext<'_>, n: usize) -> usize {
        let plan = self.panel.plan;
        let mut pending: Vec<(usize, &'p Judge)> =
            (0..n).filter_map(|_| self.panel.assign()).collect();
        let assigned = pending.len();

        while !pending.is_empty() {
            let calls = pending.iter().map(|&(k, judge)| {
                let request = plan.request(k, ctx.criterion);
                async move {
                    let outcome = judge_pair(ctx.oracle, judge, &request, ctx.policy).await;
                    (judge, request, outcome)
                }
            });
            let results = futures::future::join_all(calls).await;

            let mut replacements = Vec::new();
            for (judge, request, outcome) in results {
                self.outcome.judges.push(judge.id.clone());
                if let (true, Some(verdict)) = (outcome.status.is_valid(), outcome.verdict.as_ref()) {
                    let winner = winner_for_label(
                        request.order,
                        verdict.winner,
                        &plan.candidate_a.id,
                        &plan.candidate_b.id,
                    );
                    self.outcome.records.push(MatchRecord {
                        match_id: request.match_id.clone(),
                        round: plan.round,
                        candidate_a: plan.candidate_a.id.clone(),
                        candidate_b: plan.candidate_b.id.clone(),
                        judge: judge.id.clone(),
                        presented_order: request.order,
                        winner: winner.to_string(),
                        confidence: verdict.confidence,
                        rationale: verdict.rationale.clone(),
                    });
                    continue;
                }

                let mut event =
                    AuditEvent::from_outcome("tournament", &request.match_id, &judge.id, &outcome);
                self.outcome.dropped_calls += 1;
                if outcome.status == CallStatus::TimedOut {
                    match self.panel.assign() {
                        Some((k, replacement)) => {
                            warn!(
                                match_id = %request.match_id,
                                judge = %judge.id,
                                replacement = %replacement.id,
                                "judge timed out twice, assigning replacement"
                            );
                            event.replaced_by = Some(replacement.id.clone());
                            self.outcome.replacements += 1;
                            replacements.push((k, replacement));
                        }
                        None => {
                            warn!(
                                match_id = %request.match_id,
                                judge = %judge.id,
                                "judge timed out and no provider-distinct replacement is left"
                            );
                        }
                    }
                } else {
                    warn!(
                        match_id = %request.match_id,
                        judge = %judge.id,
                        outcome = outcome.status.as_str(),
                        "judge call dropped"
                    );
                }
                self.outcome.audit.push(event);
            }
            pending = replacements;
        }
        assigned
    }
}

/// Judge one pairing.
///
/// The base panel is called first (in two stages when early stop is active). A
/// split panel gets up to `extra_judges` more judges. A tie that survives is
/// settled by the plan's coin; a bout with no valid vote is void.
pub async fn run_bout(ctx: &BoutContext<'_>, plan: &BoutPlan) -> BoutOutcome {
    let mut tally = Tally {
        panel: Panel::new(plan),
        outcome: BoutOutcome {
            match_id: plan.match_id.clone(),
            round: plan.round,
            candidate_a: plan.candidate_a.id.clone(),
            candidate_b: plan.candidate_b.id.clone(),
            winner: None,
            votes_a: 0,
            votes_b: 0,
            judges: Vec::new(),
            escalated: false,
            tie_broken: false,
            void: false,
            records: Vec::new(),
            audit: Vec::new(),
            dropped_calls: 0,
            replacements: 0,
        },
    };

    match ctx.early_stop.first_stage(plan.panel) {
        Some(first) => {
            tally.call_stage(ctx, first).await;
            let (a, b) = tally.votes();
            let unanimous = a + b >= first && (a == 0 || b == 0);
            if unanimous {
                debug!(match_id = %plan.match_id, "panel unanimous, skipping remaining judges");
            } else {
                tally.call_stage(ctx, plan.panel - first).await;
            }
        }
        None => {
            tally.call_stage(ctx, plan.panel).await;
        }
    }

    if ctx.escalation.enabled {
        let mut added = 0;
        while added < ctx.escalation.extra_judges {
            let (a, b) = tally.votes();
            if a + b == 0 || a != b {
                break;
            }
            if tally.call_stage(ctx, 1).await == 0 {
                break;
            }
            tally.outcome.escalated = true;
            added += 1;
        }
    }

    let (a, b) = tally.votes();
    let mut outcome = tally.outcome;
    outcome.votes_a = a;
    outcome.votes_b = b;
    outcome.winner = if a > b {
        Some(plan.candidate_a.id.clone())
    } else if b > a {
        Some(plan.candidate_b.id.clone())
    } else if a > 0 {
        outcome.tie_broken = true;
        debug!(match_id = %plan.match_id, "tied panel settled by coin");
        Some(if plan.tie_coin {
            plan.candidate_a.id.clone()
        } else {
            plan.candidate_b.id.clone()
        })
    } else {
        warn!(match_id = %plan.match_id, "no valid votes, bout is void");
        outcome.void = true;
        None
    };
    outcome
}
