//! Judge calibration against reference items of known tier.
//!
//! A small cross-tier plan is judged by every judge. Accuracy and position bias
//! give each judge a reliability `rho`, normalized so the best judge has 1.0. Results
//! are persisted after every batch, and a re-run skips calls already on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::judge::{judge_pair, CallPolicy, JudgeOracle, PairRequest, PairSide, DEFAULT_CRITERION};
use crate::ledger::write_json_atomic;
use crate::model::{CalibrationItem, Judge, PresentedOrder, Tier};
use crate::trace::{AuditEvent, AuditSink};

/// z for a two-sided 95% interval.
pub const Z_95: f64 = 1.959963984540054;

const REJECTION_TRIES: usize = 200;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("invalid calibration pack: {0}")]
    InvalidPack(String),
    #[error("no judges to calibrate")]
    NoJudges,
    #[error("results file was planned with seed {found}, expected {expected}")]
    SeedMismatch { expected: u64, found: u64 },
    #[error("results io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("results at {path} are not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

// -----------------------------------------------------------------------------
// Config
// -----------------------------------------------------------------------------

/// How raw accuracy becomes reliability before the position-bias discount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RhoBasis {
    /// `max(0, 2 * accuracy - 1)`: a coin-flip judge gets 0.
    #[default]
    ChanceCorrected,
    /// `accuracy` as-is.
    RawAccuracy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Seed for pair sampling and swaps. Stored in the results file.
    /// Default: 0
    pub plan_seed: u64,
    /// Distinct cross-tier pairs sampled per tier pair. Default: 15
    pub pairs_per_tier_pair: usize,
    /// Minimum times each item appears within its tier pair. Default: 1
    pub min_appearances: usize,
    /// Share of pairs shown lower tier first. Default: 0.3
    pub swap_fraction: f64,
    /// Concurrent judge calls. Default: 8
    pub concurrency: usize,
    /// Calls between results-file saves. Default: 24
    pub batch_size: usize,
    /// Default: chance_corrected
    pub rho_basis: RhoBasis,
    /// Below this many calls a judge's estimate is labelled "low". Default: 10
    pub low_confidence_below: usize,
    pub criterion: String,
    pub call_policy: CallPolicy,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            plan_seed: 0,
            pairs_per_tier_pair: 15,
            min_appearances: 1,
            swap_fraction: 0.3,
            concurrency: 8,
            batch_size: 24,
            rho_basis: RhoBasis::ChanceCorrected,
            low_confidence_below: 10,
            criterion: DEFAULT_CRITERION.to_string(),
            call_policy: CallPolicy::default(),
        }
    }
}

// -----------------------------------------------------------------------------
// Pack
// -----------------------------------------------------------------------------

/// Accepts a flat item list or `{"tiers": {"high": [...], "mid": {"papers": [...]}, ...}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CalibrationPack {
    Items(Vec<CalibrationItem>),
    Tiered { tiers: BTreeMap<Tier, TierBlock> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TierBlock {
    List(Vec<PackEntry>),
    Papers { papers: Vec<PackEntry> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackEntry {
    #[serde(alias = "id", alias = "paper_id")]
    pub item_id: String,
    #[serde(alias = "abstract", alias = "summary")]
    pub text: String,
}

impl CalibrationPack {
    pub fn into_items(self) -> Vec<CalibrationItem> {
        match self {
            CalibrationPack::Items(items) => items,
            CalibrationPack::Tiered { tiers } => tiers
                .into_iter()
                .flat_map(|(tier, block)| {
                    let entries = match block {
                        TierBlock::List(entries) | TierBlock::Papers { papers: entries } => entries,
                    };
                    entries.into_iter().map(move |e| CalibrationItem {
                        item_id: e.item_id,
                        text: e.text,
                        true_tier: tier,
                    })
                })
                .collect(),
        }
    }
}

/// Unique ids, non-empty texts, every tier present.
pub fn validate_pack(items: &[CalibrationItem]) -> Result<(), CalibrationError> {
    let mut seen = BTreeSet::new();
    for item in items {
        if item.item_id.trim().is_empty() {
            return Err(CalibrationError::InvalidPack("empty item id".into()));
        }
        if !seen.insert(item.item_id.as_str()) {
            return Err(CalibrationError::InvalidPack(format!(
                "duplicate item id '{}'",
                item.item_id
            )));
        }
        if item.text.trim().is_empty() {
            return Err(CalibrationError::InvalidPack(format!(
                "item '{}' has empty text",
                item.item_id
            )));
        }
    }
    for tier in Tier::ALL {
        if !items.iter().any(|i| i.true_tier == tier) {
            return Err(CalibrationError::InvalidPack(format!(
                "no items in tier '{}'",
                tier.as_str()
            )));
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Plan
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPair {
    HighVsMid,
    HighVsLow,
    MidVsLow,
}

impl TierPair {
    pub const ALL: [TierPair; 3] = [TierPair::HighVsMid, TierPair::HighVsLow, TierPair::MidVsLow];

    pub fn tiers(self) -> (Tier, Tier) {
        match self {
            TierPair::HighVsMid => (Tier::High, Tier::Mid),
            TierPair::HighVsLow => (Tier::High, Tier::Low),
            TierPair::MidVsLow => (Tier::Mid, Tier::Low),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TierPair::HighVsMid => "high_vs_mid",
            TierPair::HighVsLow => "high_vs_low",
            TierPair::MidVsLow => "mid_vs_low",
        }
    }
}

/// One planned pair. `higher` is the ground-truth winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPair {
    pub base_id: String,
    pub tier_pair: TierPair,
    pub higher: String,
    pub lower: String,
    /// Lower-tier item shown first.
    pub swapped: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationPlan {
    pub seed: u64,
    pub pairs: Vec<PlannedPair>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

pub fn plan_calibration(
    items: &[CalibrationItem],
    config: &CalibrationConfig,
) -> Result<CalibrationPlan, CalibrationError> {
    validate_pack(items)?;
    if !(0.0..=1.0).contains(&config.swap_fraction) {
        return Err(CalibrationError::InvalidPack(format!(
            "swap_fraction must be within [0, 1], got {}",
            config.swap_fraction
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.plan_seed);
    let mut by_tier: BTreeMap<Tier, Vec<&str>> = BTreeMap::new();
    for item in items {
        by_tier.entry(item.true_tier).or_default().push(&item.item_id);
    }

    let mut plan = CalibrationPlan {
        seed: config.plan_seed,
        ..Default::default()
    };
    let mut counter = 0usize;
    for tier_pair in TierPair::ALL {
        let (hi_tier, lo_tier) = tier_pair.tiers();
        let hi = by_tier.get(&hi_tier).cloned().unwrap_or_default();
        let lo = by_tier.get(&lo_tier).cloned().unwrap_or_default();
        let all: Vec<(&str, &str)> = hi
            .iter()
            .flat_map(|h| lo.iter().map(move |l| (*h, *l)))
            .collect();
        let n = config.pairs_per_tier_pair.min(all.len());

        let mut min_app = config.min_appearances;
        let feasible = n / hi.len().max(lo.len()).max(1);
        if min_app > feasible {
            let message = format!(
                "{}: {n} pairs cannot give every item {min_app} appearances; using {feasible}",
                tier_pair.as_str()
            );
            warn!("{message}");
            plan.warnings.push(message);
            min_app = feasible;
        }

        let sampled = sample_pairs(&all, &hi, &lo, n, min_app, &mut rng);

        let swap_count = ((n as f64) * config.swap_fraction).round() as usize;
        let mut idx: Vec<usize> = (0..sampled.len()).collect();
        idx.shuffle(&mut rng);
        let swapped: BTreeSet<usize> = idx.into_iter().take(swap_count.min(n)).collect();

        for (i, (h, l)) in sampled.into_iter().enumerate() {
            counter += 1;
            plan.pairs.push(PlannedPair {
                base_id: format!("CAL-{counter:03}"),
                tier_pair,
                higher: h.to_string(),
                lower: l.to_string(),
                swapped: swapped.contains(&i),
            });
        }
    }
    Ok(plan)
}

fn appearances_met(sample: &[(&str, &str)], hi: &[&str], lo: &[&str], min_app: usize) -> bool {
    if min_app == 0 {
        return true;
    }
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (h, l) in sample {
        *counts.entry(h).or_insert(0) += 1;
        *counts.entry(l).or_insert(0) += 1;
    }
    hi.iter()
        .chain(lo.iter())
        .all(|id| counts.get(id).copied().unwrap_or(0) >= min_app)
}

/// Rejection sampling first; greedy deficit-filling when that keeps missing.
fn sample_pairs<'a>(
    all: &[(&'a str, &'a str)],
    hi: &[&str],
    lo: &[&str],
    n: usize,
    min_app: usize,
    rng: &mut StdRng,
) -> Vec<(&'a str, &'a str)> {
    for _ in 0..REJECTION_TRIES {
        let sample: Vec<_> = all.choose_multiple(rng, n).copied().collect();
        if appearances_met(&sample, hi, lo, min_app) {
            return sample;
        }
    }

    let mut pool: Vec<(&str, &str)> = all.to_vec();
    pool.shuffle(rng);
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(n);
    while out.len() < n && !pool.is_empty() {
        let deficit = |id: &str, counts: &BTreeMap<&str, usize>| {
            min_app.saturating_sub(counts.get(id).copied().unwrap_or(0))
        };
        let best = pool
            .iter()
            .enumerate()
            .max_by(|(i, x), (j, y)| {
                let sx = deficit(x.0, &counts) + deficit(x.1, &counts);
                let sy = deficit(y.0, &counts) + deficit(y.1, &counts);
                sx.cmp(&sy).then(j.cmp(i))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let pair = pool.swap_remove(best);
        *counts.entry(pair.0).or_insert(0) += 1;
        *counts.entry(pair.1).or_insert(0) += 1;
        out.push(pair);
    }
    out
}

// -----------------------------------------------------------------------------
// Results store
// -----------------------------------------------------------------------------

/// One judge's verdict on one planned pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecord {
    pub base_id: String,
    pub judge: String,
    pub tier_pair: TierPair,
    pub item_first: String,
    pub item_second: String,
    /// Whether the higher-tier item was shown first.
    pub better_first: bool,
    pub winner: String,
    pub correct: bool,
    pub picked_first: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResults {
    pub plan_seed: u64,
    #[serde(default)]
    pub records: Vec<CalibrationRecord>,
}

impl CalibrationResults {
    pub fn completed(&self) -> BTreeSet<(String, String)> {
        self.records
            .iter()
            .map(|r| (r.base_id.clone(), r.judge.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationStore {
    path: PathBuf,
}

impl CalibrationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<CalibrationResults>, CalibrationError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| CalibrationError::Parse {
                    path: self.path.clone(),
                    source,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CalibrationError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self, results: &CalibrationResults) -> Result<(), CalibrationError> {
        write_json_atomic(&self.path, results).map_err(|source| CalibrationError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

// -----------------------------------------------------------------------------
// Run
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub results: CalibrationResults,
    pub report: CalibrationReport,
    /// Calls skipped because they were already on disk.
    pub skipped: usize,
    pub executed: usize,
    /// Calls that produced no valid verdict.
    pub dropped: usize,
}

/// Judge every planned pair with every judge, skipping completed calls.
pub async fn run_calibration(
    oracle: &dyn JudgeOracle,
    judges: &[Judge],
    items: &[CalibrationItem],
    config: &CalibrationConfig,
    store: Option<&CalibrationStore>,
    audit: Option<&dyn AuditSink>,
) -> Result<CalibrationRun, CalibrationError> {
    if judges.is_empty() {
        return Err(CalibrationError::NoJudges);
    }
    let plan = plan_calibration(items, config)?;
    let texts: BTreeMap<&str, &str> = items
        .iter()
        .map(|i| (i.item_id.as_str(), i.text.as_str()))
        .collect();

    let mut results = match store.map(|s| s.load()).transpose()?.flatten() {
        Some(existing) if existing.plan_seed != plan.seed => {
            return Err(CalibrationError::SeedMismatch {
                expected: plan.seed,
                found: existing.plan_seed,
            })
        }
        Some(existing) => existing,
        None => CalibrationResults {
            plan_seed: plan.seed,
            records: Vec::new(),
        },
    };
    let completed = results.completed();

    let mut pending = Vec::new();
    let mut skipped = 0usize;
    for pair in &plan.pairs {
        for judge in judges {
            if completed.contains(&(pair.base_id.clone(), judge.id.clone())) {
                skipped += 1;
            } else {
                pending.push((pair, judge));
            }
        }
    }
    info!(
        planned = plan.pairs.len() * judges.len(),
        skipped,
        pending = pending.len(),
        "calibration"
    );

    let mut executed = 0usize;
    let mut dropped = 0usize;
    for batch in pending.chunks(config.batch_size.max(1)) {
        let calls = batch.iter().enumerate().map(|(idx, (pair, judge))| {
            let (first, second) = if pair.swapped {
                (&pair.lower, &pair.higher)
            } else {
                (&pair.higher, &pair.lower)
            };
            let request = PairRequest {
                match_id: format!("{}-{}", pair.base_id, judge.id),
                criterion: config.criterion.clone(),
                candidate_a: PairSide::new(first.clone(), text_of(&texts, first)),
                candidate_b: PairSide::new(second.clone(), text_of(&texts, second)),
                order: PresentedOrder::AFirst,
            };
            async move {
                let outcome = judge_pair(oracle, judge, &request, &config.call_policy).await;
                (idx, request, outcome)
            }
        });
        let mut outcomes: Vec<_> = stream::iter(calls)
            .buffer_unordered(config.concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _, _)| *idx);

        for (idx, request, outcome) in outcomes {
            executed += 1;
            let (pair, judge) = batch[idx];
            let Some(verdict) = outcome.verdict.as_ref().filter(|_| outcome.status.is_valid())
            else {
                dropped += 1;
                if let Some(sink) = audit {
                    let event =
                        AuditEvent::from_outcome("calibration", &request.match_id, &judge.id, &outcome);
                    if let Err(e) = sink.record(event) {
                        warn!(error = %e, "failed to record audit event");
                    }
                }
                continue;
            };
            let picked_first = verdict.winner == crate::model::SlotLabel::A;
            let winner = if picked_first {
                request.candidate_a.id.clone()
            } else {
                request.candidate_b.id.clone()
            };
            results.records.push(CalibrationRecord {
                base_id: pair.base_id.clone(),
                judge: judge.id.clone(),
                tier_pair: pair.tier_pair,
                item_first: request.candidate_a.id.clone(),
                item_second: request.candidate_b.id.clone(),
                better_first: !pair.swapped,
                correct: winner == pair.higher,
                winner,
                picked_first,
                confidence: verdict.confidence,
            });
        }

        results
            .records
            .sort_by(|a, b| a.base_id.cmp(&b.base_id).then_with(|| a.judge.cmp(&b.judge)));
        if let Some(store) = store {
            store.save(&results)?;
        }
    }

    let mut report = compute_calibration(&results.records, judges, config);
    let mut warnings = plan.warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;
    Ok(CalibrationRun {
        results,
        report,
        skipped,
        executed,
        dropped,
    })
}

fn text_of(texts: &BTreeMap<&str, &str>, id: &str) -> String {
    texts.get(id).copied().unwrap_or_default().to_string()
}

// -----------------------------------------------------------------------------
// Report
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierPairStats {
    pub calls: usize,
    pub correct: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeCalibration {
    pub judge: String,
    pub provider: String,
    pub total_calls: usize,
    pub correct_calls: usize,
    pub accuracy: f64,
    pub accuracy_ci_lower: f64,
    pub accuracy_ci_upper: f64,
    /// In [-1, 1]; positive favours the first-shown slot.
    pub position_bias: f64,
    pub raw_rho: f64,
    /// Normalized so the best judge has 1.0.
    pub rho: f64,
    /// "low" or "high".
    pub confidence: String,
    pub tier_pairs: BTreeMap<String, TierPairStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub rho_basis: RhoBasis,
    pub judges: BTreeMap<String, JudgeCalibration>,
    /// Judges with zero valid calls. They take no part in the tournament.
    pub excluded: Vec<String>,
    pub tier_pairs: BTreeMap<String, TierPairStats>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl CalibrationReport {
    /// `rho` per calibrated judge.
    pub fn weights(&self) -> BTreeMap<String, f64> {
        self.judges
            .iter()
            .map(|(id, j)| (id.clone(), j.rho))
            .collect()
    }

    /// The pool minus excluded and never-calibrated judges, in pool order.
    pub fn eligible_judges(&self, pool: &[Judge]) -> Vec<Judge> {
        pool.iter()
            .filter(|j| self.judges.contains_key(&j.id))
            .cloned()
            .collect()
    }
}

pub fn wilson_interval(correct: usize, total: usize, z: f64) -> (f64, f64) {
    if total == 0 {
        return (0.0, 0.0);
    }
    let n = total as f64;
    let p = correct as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denom;
    let spread = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt() / denom;
    ((center - spread).max(0.0), (center + spread).min(1.0))
}

/// Order-balanced position bias in [-1, 1].
fn position_bias(records: &[&CalibrationRecord]) -> f64 {
    let rate = |subset: Vec<&&CalibrationRecord>| -> Option<f64> {
        if subset.is_empty() {
            return None;
        }
        let first = subset.iter().filter(|r| r.picked_first).count();
        Some(first as f64 / subset.len() as f64)
    };
    let unswapped = rate(records.iter().filter(|r| r.better_first).collect());
    let swapped = rate(records.iter().filter(|r| !r.better_first).collect());
    let first_rate = match (unswapped, swapped) {
        (Some(a), Some(b)) => 0.5 * (a + b),
        (Some(r), None) | (None, Some(r)) => r,
        (None, None) => 0.5,
    };
    2.0 * first_rate - 1.0
}

pub fn compute_calibration(
    records: &[CalibrationRecord],
    judges: &[Judge],
    config: &CalibrationConfig,
) -> CalibrationReport {
    let mut report = CalibrationReport {
        rho_basis: config.rho_basis,
        ..Default::default()
    };

    let mut by_judge: BTreeMap<&str, Vec<&CalibrationRecord>> = BTreeMap::new();
    for r in records {
        by_judge.entry(r.judge.as_str()).or_default().push(r);
        let stats = report
            .tier_pairs
            .entry(r.tier_pair.as_str().to_string())
            .or_default();
        stats.calls += 1;
        stats.correct += usize::from(r.correct);
    }
    for stats in report.tier_pairs.values_mut() {
        stats.accuracy = stats.correct as f64 / stats.calls.max(1) as f64;
    }

    for judge in judges {
        let Some(recs) = by_judge.get(judge.id.as_str()).filter(|r| !r.is_empty()) else {
            let message = format!("judge {} has no valid calibration calls; excluded", judge.id);
            warn!(judge = %judge.id, "no valid calibration calls; excluding judge");
            report.excluded.push(judge.id.clone());
            report.warnings.push(message);
            continue;
        };
        let total = recs.len();
        let correct = recs.iter().filter(|r| r.correct).count();
        let accuracy = correct as f64 / total as f64;
        let (lo, hi) = wilson_interval(correct, total, Z_95);
        let bias = position_bias(recs);
        let basis = match config.rho_basis {
            RhoBasis::ChanceCorrected => (2.0 * accuracy - 1.0).max(0.0),
            RhoBasis::RawAccuracy => accuracy,
        };
        let raw_rho = basis * (1.0 - bias.abs());

        let mut tier_pairs: BTreeMap<String, TierPairStats> = BTreeMap::new();
        for r in recs {
            let stats = tier_pairs.entry(r.tier_pair.as_str().to_string()).or_default();
            stats.calls += 1;
            stats.correct += usize::from(r.correct);
        }
        for stats in tier_pairs.values_mut() {
            stats.accuracy = stats.correct as f64 / stats.calls.max(1) as f64;
        }

        report.judges.insert(
            judge.id.clone(),
            JudgeCalibration {
                judge: judge.id.clone(),
                provider: judge.provider.clone(),
                total_calls: total,
                correct_calls: correct,
                accuracy,
                accuracy_ci_lower: lo,
                accuracy_ci_upper: hi,
                position_bias: bias,
                raw_rho,
                rho: 0.0,
                confidence: if total < config.low_confidence_below {
                    "low".to_string()
                } else {
                    "high".to_string()
                },
                tier_pairs,
            },
        );
    }

    let max_raw = report
        .judges
        .values()
        .map(|j| j.raw_rho)
        .fold(0.0_f64, f64::max);
    if max_raw > 0.0 {
        for j in report.judges.values_mut() {
            j.rho = j.raw_rho / max_raw;
        }
    } else if !report.judges.is_empty() {
        let message = "every calibrated judge has zero reliability; all rho are 0".to_string();
        warn!("{message}");
        report.warnings.push(message);
    }
    report
}
