//! Bradley–Terry estimation with fixed judge reliability and a penalized position bias.
//!
//! Model: `P(a beats b | judge j) = sigmoid(rho_j * (theta_a - theta_b) + pi_j * pos(a))`
//! where `pos(a)` is +1 when `a` was shown first. `rho_j` comes from calibration and is
//! held fixed; `theta` and `pi` are fit by alternating surrogate (MM) steps:
//!
//! - theta: diagonal Newton step `sum rho (y - p) / sum rho^2 p (1 - p)`, then re-centred
//!   so that `sum theta = 0`.
//! - pi: penalized Newton step `(sum pos (y - p) - 2 lambda pi) / (sum p (1 - p) + 2 lambda)`.
//!
//! Uncertainty comes from a percentile bootstrap over the match log.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::MatchRecord;

/// Floor on the per-parameter curvature.
const MIN_CURVATURE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("invalid estimator config: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------
//  Config
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Iteration cap. Default: 100
    pub max_iter: usize,
    /// Converged when the largest parameter change falls below this. Default: 1e-6
    pub eps: f64,
    /// L2 strength on position bias. Default: 0.1
    pub lambda_pi: f64,
    /// |theta| and |pi| bound. Default: 5.0
    pub param_clamp: f64,
    /// Per-iteration step bound. Default: 1.0
    pub step_clamp: f64,
    /// Bootstrap resamples; 0 disables intervals. Default: 200
    pub bootstrap_samples: usize,
    /// Two-sided interval mass. Default: 0.95
    pub ci_level: f64,
    /// Candidates with fewer valid matches are left unranked. Default: 3
    pub min_matches: usize,
    /// Reliability for judges missing from the calibration weights. When unset,
    /// their matches are dropped from the fit. Default: None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_rho: Option<f64>,
    /// Bootstrap seed.
    pub seed: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            eps: 1e-6,
            lambda_pi: 0.1,
            param_clamp: 5.0,
            step_clamp: 1.0,
            bootstrap_samples: 200,
            ci_level: 0.95,
            min_matches: 3,
            default_rho: None,
            seed: 0,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), EstimatorError> {
        if self.max_iter == 0 {
            return Err(EstimatorError::InvalidConfig("max_iter must be at least 1".into()));
        }
        if !(self.eps > 0.0) {
            return Err(EstimatorError::InvalidConfig("eps must be positive".into()));
        }
        if !(self.lambda_pi >= 0.0) {
            return Err(EstimatorError::InvalidConfig("lambda_pi must be non-negative".into()));
        }
        if !(self.param_clamp > 0.0 && self.step_clamp > 0.0) {
            return Err(EstimatorError::InvalidConfig("clamps must be positive".into()));
        }
        if !(self.ci_level > 0.0 && self.ci_level < 1.0) {
            return Err(EstimatorError::InvalidConfig("ci_level must be within (0, 1)".into()));
        }
        if self.default_rho.is_some_and(|r| !(0.0..=1.0).contains(&r)) {
            return Err(EstimatorError::InvalidConfig("default_rho must be within [0, 1]".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------
//  Output types
// ---------------------------------------------------------------------

/// Point estimates. `theta` sums to zero over the fitted candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingState {
    pub theta: BTreeMap<String, f64>,
    pub pi: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub id: String,
    /// 1-based.
    pub rank: usize,
    pub theta: f64,
    /// Bootstrap mean of theta; the point estimate when no resample drew it.
    pub mu: f64,
    /// Bootstrap standard deviation.
    pub sigma: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub matches: usize,
    pub wins: usize,
    pub losses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsufficientCandidate {
    pub id: String,
    pub matches: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeDiagnostic {
    pub rho: f64,
    pub pi: f64,
    pub calls: usize,
    /// No calibration weight was supplied and `default_rho` stood in.
    pub rho_defaulted: bool,
    /// No calibration weight was supplied; the judge's matches were dropped.
    #[serde(default)]
    pub uncalibrated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorMeta {
    pub iterations: usize,
    pub converged: bool,
    /// Best iterate used after hitting the iteration cap.
    pub approximate: bool,
    pub max_delta: f64,
    pub log_likelihood: f64,
    pub valid_matches: usize,
    pub ignored_matches: usize,
    /// Matches dropped because their judge had no calibration weight.
    #[serde(default)]
    pub uncalibrated_matches: usize,
    pub bootstrap_samples: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingReport {
    pub state: RatingState,
    /// Best first.
    pub ranked: Vec<RankedCandidate>,
    pub insufficient: Vec<InsufficientCandidate>,
    pub judges: BTreeMap<String, JudgeDiagnostic>,
    /// The top candidate and every ranked candidate whose interval overlaps it.
    pub leaders: Vec<String>,
    pub meta: EstimatorMeta,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RatingReport {
    pub fn get(&self, id: &str) -> Option<&RankedCandidate> {
        self.ranked.iter().find(|r| r.id == id)
    }

    pub fn is_insufficient(&self, id: &str) -> bool {
        self.insufficient.iter().any(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------
//  Core fit
// ---------------------------------------------------------------------

/// One usable match in index form.
#[derive(Debug, Clone, Copy)]
struct Obs {
    a: usize,
    b: usize,
    judge: usize,
    rho: f64,
    pos_a: f64,
    /// 1 when `a` won.
    y: f64,
}

#[derive(Debug, Clone)]
struct Fit {
    theta: Vec<f64>,
    pi: Vec<f64>,
    iterations: usize,
    converged: bool,
    max_delta: f64,
    log_likelihood: f64,
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn win_prob(o: &Obs, theta: &[f64], pi: &[f64]) -> f64 {
    sigmoid(o.rho * (theta[o.a] - theta[o.b]) + pi[o.judge] * o.pos_a)
}

fn penalized_log_likelihood(obs: &[Obs], theta: &[f64], pi: &[f64], lambda: f64) -> f64 {
    let ll: f64 = obs
        .iter()
        .map(|o| {
            let p = win_prob(o, theta, pi).clamp(1e-15, 1.0 - 1e-15);
            o.y * p.ln() + (1.0 - o.y) * (1.0 - p).ln()
        })
        .sum();
    ll - lambda * pi.iter().map(|p| p * p).sum::<f64>()
}

fn recenter(theta: &mut [f64], clamp: f64) {
    if theta.is_empty() {
        return;
    }
    let n = theta.len() as f64;
    let mean = theta.iter().sum::<f64>() / n;
    for t in theta.iter_mut() {
        *t = (*t - mean).clamp(-clamp, clamp);
    }
    let mean = theta.iter().sum::<f64>() / n;
    for t in theta.iter_mut() {
        *t -= mean;
    }
}

fn fit(obs: &[Obs], n_candidates: usize, n_judges: usize, config: &EstimatorConfig) -> Fit {
    let mut theta = vec![0.0; n_candidates];
    let mut pi = vec![0.0; n_judges];
    let lambda = config.lambda_pi;

    let mut best_theta = theta.clone();
    let mut best_pi = pi.clone();
    let mut best_ll = penalized_log_likelihood(obs, &theta, &pi, lambda);
    let mut max_delta = f64::INFINITY;

    for iter in 1..=config.max_iter {
        let mut grad = vec![0.0; n_candidates];
        let mut curv = vec![0.0; n_candidates];
        for o in obs {
            let p = win_prob(o, &theta, &pi);
            let g = o.rho * (o.y - p);
            let h = o.rho * o.rho * p * (1.0 - p);
            grad[o.a] += g;
            grad[o.b] -= g;
            curv[o.a] += h;
            curv[o.b] += h;
        }
        let previous = theta.clone();
        for i in 0..n_candidates {
            let step = (grad[i] / curv[i].max(MIN_CURVATURE))
                .clamp(-config.step_clamp, config.step_clamp);
            theta[i] += step;
        }
        recenter(&mut theta, config.param_clamp);

        let mut pi_grad = vec![0.0; n_judges];
        let mut pi_curv = vec![0.0; n_judges];
        for o in obs {
            let p = win_prob(o, &theta, &pi);
            pi_grad[o.judge] += o.pos_a * (o.y - p);
            pi_curv[o.judge] += p * (1.0 - p);
        }
        let mut delta = previous
            .iter()
            .zip(&theta)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        for j in 0..n_judges {
            let num = pi_grad[j] - 2.0 * lambda * pi[j];
            let den = (pi_curv[j] + 2.0 * lambda).max(MIN_CURVATURE);
            let step = (num / den).clamp(-config.step_clamp, config.step_clamp);
            let next = (pi[j] + step).clamp(-config.param_clamp, config.param_clamp);
            delta = delta.max((next - pi[j]).abs());
            pi[j] = next;
        }

        let ll = penalized_log_likelihood(obs, &theta, &pi, lambda);
        if ll >= best_ll {
            best_ll = ll;
            best_theta.clone_from(&theta);
            best_pi.clone_from(&pi);
        }
        max_delta = delta;
        if delta < config.eps {
            return Fit {
                theta,
                pi,
                iterations: iter,
                converged: true,
                max_delta,
                log_likelihood: ll,
            };
        }
    }

    Fit {
        theta: best_theta,
        pi: best_pi,
        iterations: config.max_iter,
        converged: false,
        max_delta,
        log_likelihood: best_ll,
    }
}

// ---------------------------------------------------------------------
//  Bootstrap helpers
// ---------------------------------------------------------------------

/// Linear-interpolated percentile of sorted values, `q` in [0, 1].
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
        }
    }
}

/// Refit on one resample. Only candidates present in it are fitted.
fn bootstrap_draw(
    obs: &[Obs],
    n_judges: usize,
    rng: &mut StdRng,
    config: &EstimatorConfig,
) -> Vec<(usize, f64)> {
    let n = obs.len();
    let sample: Vec<Obs> = (0..n).map(|_| obs[rng.gen_range(0..n)]).collect();
    let present: BTreeSet<usize> = sample.iter().flat_map(|o| [o.a, o.b]).collect();
    let local: BTreeMap<usize, usize> = present.iter().enumerate().map(|(i, g)| (*g, i)).collect();
    let remapped: Vec<Obs> = sample
        .into_iter()
        .filter_map(|o| {
            Some(Obs {
                a: *local.get(&o.a)?,
                b: *local.get(&o.b)?,
                ..o
            })
        })
        .collect();
    let result = fit(&remapped, present.len(), n_judges, config);
    present
        .into_iter()
        .zip(result.theta)
        .collect()
}

// ---------------------------------------------------------------------
//  Entry point
// ---------------------------------------------------------------------

/// Estimate latent quality from a match log.
///
/// `candidates` lists the pool so that candidates with no valid matches are
/// reported as insufficient; ids that only appear in the log are added to it.
/// `rho` holds calibrated judge weights.
pub fn rate(
    candidates: &[String],
    matches: &[MatchRecord],
    rho: &BTreeMap<String, f64>,
    config: &EstimatorConfig,
) -> Result<RatingReport, EstimatorError> {
    config.validate()?;
    let mut warnings = Vec::new();

    let well_formed: Vec<&MatchRecord> = matches.iter().filter(|m| m.is_well_formed()).collect();
    let ignored = matches.len() - well_formed.len();
    if ignored > 0 {
        warn!(ignored, "ignoring malformed match records");
        warnings.push(format!("{ignored} malformed match records ignored"));
    }

    let mut judges: BTreeMap<String, JudgeDiagnostic> = BTreeMap::new();
    for id in well_formed.iter().map(|m| &m.judge).collect::<BTreeSet<_>>() {
        let (rho, rho_defaulted, uncalibrated) = match (rho.get(id), config.default_rho) {
            (Some(r), _) => (r.clamp(0.0, 1.0), false, false),
            (None, Some(default_rho)) => {
                warn!(judge = %id, default_rho, "judge has no calibration weight");
                warnings.push(format!("judge {id} has no calibration weight; using {default_rho}"));
                (default_rho, true, false)
            }
            (None, None) => {
                warn!(judge = %id, "judge has no calibration weight; dropping its matches");
                warnings.push(format!("judge {id} has no calibration weight; its matches were dropped"));
                (0.0, false, true)
            }
        };
        judges.insert(
            id.clone(),
            JudgeDiagnostic {
                rho,
                pi: 0.0,
                calls: 0,
                rho_defaulted,
                uncalibrated,
            },
        );
    }
    let valid: Vec<&MatchRecord> = well_formed
        .into_iter()
        .filter(|m| judges.get(&m.judge).is_some_and(|d| !d.uncalibrated))
        .collect();
    let uncalibrated_matches = matches.len() - ignored - valid.len();

    let mut pool: BTreeSet<String> = candidates.iter().cloned().collect();
    for m in &valid {
        pool.insert(m.candidate_a.clone());
        pool.insert(m.candidate_b.clone());
    }
    let ids: Vec<String> = pool.into_iter().collect();
    let index: BTreeMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let judge_ids: Vec<String> = valid
        .iter()
        .map(|m| m.judge.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let judge_index: BTreeMap<&str, usize> = judge_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let judge_rho: Vec<f64> = judge_ids
        .iter()
        .map(|id| judges.get(id).map_or(0.0, |d| d.rho))
        .collect();

    let mut obs = Vec::with_capacity(valid.len());
    let mut appearances = vec![0usize; ids.len()];
    let mut wins = vec![0usize; ids.len()];
    for m in &valid {
        let (Some(&a), Some(&b), Some(&j)) = (
            index.get(m.candidate_a.as_str()),
            index.get(m.candidate_b.as_str()),
            judge_index.get(m.judge.as_str()),
        ) else {
            continue;
        };
        let a_won = m.a_won();
        obs.push(Obs {
            a,
            b,
            judge: j,
            rho: judge_rho[j],
            pos_a: m.presented_order.pos_a(),
            y: if a_won { 1.0 } else { 0.0 },
        });
        appearances[a] += 1;
        appearances[b] += 1;
        wins[if a_won { a } else { b }] += 1;
        if let Some(d) = judges.get_mut(&m.judge) {
            d.calls += 1;
        }
    }

    // Fit only candidates that appear in the log.
    let fitted: Vec<usize> = (0..ids.len()).filter(|&i| appearances[i] > 0).collect();
    let local: BTreeMap<usize, usize> = fitted.iter().enumerate().map(|(l, g)| (*g, l)).collect();
    let local_obs: Vec<Obs> = obs
        .iter()
        .filter_map(|o| {
            Some(Obs {
                a: *local.get(&o.a)?,
                b: *local.get(&o.b)?,
                ..*o
            })
        })
        .collect();

    let result = fit(&local_obs, fitted.len(), judge_ids.len(), config);
    debug!(
        iterations = result.iterations,
        converged = result.converged,
        max_delta = result.max_delta,
        "bradley-terry fit"
    );
    if !result.converged {
        warn!(
            iterations = result.iterations,
            max_delta = result.max_delta,
            "estimator did not converge; using best iterate"
        );
        warnings.push(format!(
            "estimator did not converge in {} iterations; ratings are approximate",
            result.iterations
        ));
    }

    let mut state = RatingState::default();
    let mut theta_of = vec![0.0; ids.len()];
    for (l, &g) in fitted.iter().enumerate() {
        theta_of[g] = result.theta[l];
        state.theta.insert(ids[g].clone(), result.theta[l]);
    }
    for (j, id) in judge_ids.iter().enumerate() {
        state.pi.insert(id.clone(), result.pi[j]);
        if let Some(d) = judges.get_mut(id) {
            d.pi = result.pi[j];
        }
    }

    let mut draws: Vec<Vec<f64>> = vec![Vec::new(); fitted.len()];
    if config.bootstrap_samples > 0 && !local_obs.is_empty() {
        let mut rng = StdRng::seed_from_u64(config.seed);
        for _ in 0..config.bootstrap_samples {
            for (l, t) in bootstrap_draw(&local_obs, judge_ids.len(), &mut rng, config) {
                draws[l].push(t);
            }
        }
    }

    let alpha = (1.0 - config.ci_level) / 2.0;
    let mut ranked = Vec::new();
    let mut insufficient = Vec::new();
    for (g, id) in ids.iter().enumerate() {
        if appearances[g] < config.min_matches {
            warn!(candidate = %id, matches = appearances[g], "insufficient evidence, not ranked");
            insufficient.push(InsufficientCandidate {
                id: id.clone(),
                matches: appearances[g],
                reason: format!(
                    "{} valid matches, fewer than the minimum of {}",
                    appearances[g], config.min_matches
                ),
            });
            continue;
        }
        let theta = theta_of[g];
        let (mu, sigma, lo, hi) = match local.get(&g).map(|l| &mut draws[*l]) {
            Some(samples) if !samples.is_empty() => {
                samples.sort_by(f64::total_cmp);
                let n = samples.len() as f64;
                let mean = samples.iter().sum::<f64>() / n;
                let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
                (
                    mean,
                    var.sqrt(),
                    percentile(samples, alpha),
                    percentile(samples, 1.0 - alpha),
                )
            }
            _ => (theta, 0.0, theta, theta),
        };
        ranked.push(RankedCandidate {
            id: id.clone(),
            rank: 0,
            theta,
            mu,
            sigma,
            ci_lower: lo,
            ci_upper: hi,
            matches: appearances[g],
            wins: wins[g],
            losses: appearances[g] - wins[g],
        });
    }
    ranked.sort_by(|a, b| b.theta.total_cmp(&a.theta).then_with(|| a.id.cmp(&b.id)));
    for (i, r) in ranked.iter_mut().enumerate() {
        r.rank = i + 1;
    }

    let leaders = match ranked.first() {
        Some(top) => ranked
            .iter()
            .filter(|r| r.id == top.id || r.ci_upper >= top.ci_lower)
            .map(|r| r.id.clone())
            .collect(),
        None => Vec::new(),
    };

    Ok(RatingReport {
        state,
        ranked,
        insufficient,
        judges,
        leaders,
        meta: EstimatorMeta {
            iterations: result.iterations,
            converged: result.converged,
            approximate: !result.converged,
            max_delta: result.max_delta,
            log_likelihood: result.log_likelihood,
            valid_matches: obs.len(),
            ignored_matches: ignored,
            uncalibrated_matches,
            bootstrap_samples: config.bootstrap_samples,
            seed: config.seed,
        },
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PresentedOrder;

    fn m(a: &str, b: &str, winner: &str, judge: &str, order: PresentedOrder) -> MatchRecord {
        MatchRecord {
            match_id: format!("{a}-{b}-{judge}"),
            round: 1,
            candidate_a: a.into(),
            candidate_b: b.into(),
            judge: judge.into(),
            presented_order: order,
            winner: winner.into(),
            confidence: 0.8,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&xs, 0.0), 1.0);
        assert_eq!(percentile(&xs, 1.0), 4.0);
        assert!((percentile(&xs, 0.5) - 2.5).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_sum_zero_and_order() {
        let mut log = Vec::new();
        for k in 0..4 {
            let order = PresentedOrder::from_a_first(k % 2 == 0);
            log.push(m("x", "y", "x", "j", order));
            log.push(m("y", "z", "y", "j", order));
            log.push(m("x", "z", if k == 3 { "z" } else { "x" }, "j", order));
        }
        let rho = BTreeMap::from([("j".to_string(), 1.0)]);
        let report = rate(&[], &log, &rho, &EstimatorConfig::default()).unwrap();
        let sum: f64 = report.state.theta.values().sum();
        assert!(sum.abs() < 1e-9);
        let order: Vec<_> = report.ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(order, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_insufficient_candidates_are_listed_not_ranked() {
        let log = vec![
            m("a", "b", "a", "j", PresentedOrder::AFirst),
            m("a", "b", "a", "j", PresentedOrder::BFirst),
            m("a", "b", "b", "j", PresentedOrder::AFirst),
            m("a", "c", "a", "j", PresentedOrder::AFirst),
        ];
        let report = rate(
            &["a".into(), "b".into(), "c".into(), "d".into()],
            &log,
            &BTreeMap::from([("j".to_string(), 1.0)]),
            &EstimatorConfig::default(),
        )
        .unwrap();
        let ranked: Vec<_> = report.ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ranked, vec!["a", "b"]);
        assert!(report.is_insufficient("c"));
        assert!(report.is_insufficient("d"));
        assert!(!report.judges["j"].rho_defaulted);
    }

    #[test]
    fn test_iteration_cap_marks_approximate() {
        let log = vec![
            m("a", "b", "a", "j", PresentedOrder::AFirst),
            m("b", "a", "b", "j", PresentedOrder::AFirst),
            m("a", "b", "a", "j", PresentedOrder::BFirst),
        ];
        let config = EstimatorConfig {
            max_iter: 1,
            bootstrap_samples: 0,
            ..Default::default()
        };
        let rho = BTreeMap::from([("j".to_string(), 1.0)]);
        let report = rate(&[], &log, &rho, &config).unwrap();
        assert!(report.meta.approximate);
        assert!(!report.meta.converged);
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = EstimatorConfig {
            eps: 0.0,
            ..Default::default()
        };
        assert!(rate(&[], &[], &BTreeMap::new(), &config).is_err());
    }
}
