//! Full run: calibrate → tournament → rate → portfolio → feedback.
//!
//! Every stage before feedback degrades to a smaller labelled result rather than
//! aborting. The channel ledger is committed last, so a run abandoned at any earlier
//! point leaves the previous learning state untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::SqliteMatchArchive;
use crate::bradley_terry::{rate, EstimatorConfig, EstimatorError};
use crate::calibration::{run_calibration, CalibrationConfig, CalibrationError, CalibrationStore};
use crate::feedback::{outcomes_from_ratings, run_feedback, FeedbackConfig};
use crate::judge::JudgeOracle;
use crate::ledger::{LedgerError, LedgerStore};
use crate::model::{CalibrationItem, Candidate, Judge};
use crate::portfolio::{optimize, EvidenceFlags, PortfolioConfig, PortfolioError};
use crate::report::RunReport;
use crate::trace::AuditSink;
use crate::tournament::{run_tournament, TournamentConfig, TournamentError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("calibration failed: {0}")]
    Calibration(#[from] CalibrationError),
    #[error("no judge survived calibration")]
    NoCalibratedJudges,
    #[error("tournament failed: {0}")]
    Tournament(#[from] TournamentError),
    #[error("rating failed: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("portfolio failed: {0}")]
    Portfolio(#[from] PortfolioError),
    /// Fatal: learning state must never be silently lost.
    #[error("ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Stage configs plus the run seed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Seeds the tournament, the bootstrap and posterior sampling. The calibration
    /// plan keeps its own `plan_seed` so stored results stay reusable across runs.
    pub seed: u64,
    pub calibration: CalibrationConfig,
    pub tournament: TournamentConfig,
    pub estimator: EstimatorConfig,
    pub portfolio: PortfolioConfig,
    pub feedback: FeedbackConfig,
}

impl PipelineConfig {
    /// Push `seed` into every stage that draws randomness from the run seed.
    pub fn seeded(mut self) -> Self {
        self.tournament.seed = self.seed;
        self.estimator.seed = self.seed;
        self.feedback.seed = self.seed;
        self
    }
}

pub struct PipelineInputs<'a> {
    pub candidates: &'a [Candidate],
    pub judges: &'a [Judge],
    pub calibration_items: &'a [CalibrationItem],
    pub evidence: &'a BTreeMap<String, EvidenceFlags>,
    /// Candidate id → mechanical gates it failed.
    pub failed_gates: &'a BTreeMap<String, Vec<String>>,
}

pub struct PipelineStores<'a> {
    pub ledger: &'a LedgerStore,
    pub calibration: Option<&'a CalibrationStore>,
    pub archive: Option<&'a SqliteMatchArchive>,
    pub audit: Option<&'a dyn AuditSink>,
}

pub async fn run_full(
    oracle: &dyn JudgeOracle,
    inputs: &PipelineInputs<'_>,
    stores: &PipelineStores<'_>,
    config: &PipelineConfig,
) -> Result<RunReport, PipelineError> {
    let config = config.clone().seeded();
    let mut report = RunReport::new(config.seed);
    info!(run_id = %report.run_id, seed = config.seed, candidates = inputs.candidates.len(), "pipeline start");

    // --- Calibrate ---
    let calibration = run_calibration(
        oracle,
        inputs.judges,
        inputs.calibration_items,
        &config.calibration,
        stores.calibration,
        stores.audit,
    )
    .await?;
    report.warnings.extend(calibration.report.warnings.iter().cloned());
    let judges = calibration.report.eligible_judges(inputs.judges);
    if judges.is_empty() {
        return Err(PipelineError::NoCalibratedJudges);
    }
    let weights = calibration.report.weights();
    report.calibration = Some(calibration.report);

    // --- Tournament ---
    let tournament = run_tournament(
        oracle,
        inputs.candidates,
        &judges,
        &config.tournament,
        stores.audit,
    )
    .await?;
    report.warnings.extend(tournament.warnings.iter().cloned());

    // --- Rate ---
    let ids: Vec<String> = inputs.candidates.iter().map(|c| c.id.clone()).collect();
    let ratings = rate(&ids, &tournament.matches, &weights, &config.estimator)?;

    // --- Portfolio ---
    let portfolio = optimize(&ratings, inputs.candidates, inputs.evidence, &config.portfolio)?;
    report.warnings.extend(portfolio.warnings.iter().cloned());

    if let Some(archive) = stores.archive {
        let run_id = report.run_id.to_string();
        if let Err(e) = archive
            .archive_run(&run_id, config.seed, inputs.candidates, &tournament.matches)
            .await
        {
            warn!(error = %e, "failed to archive run");
            report.warnings.push(format!("run not archived: {e}"));
        }
    }

    // --- Feedback (ledger committed last) ---
    let outcomes = outcomes_from_ratings(inputs.candidates, &ratings, inputs.failed_gates);
    let feedback = run_feedback(stores.ledger, &outcomes, &config.feedback)?;

    report.tournament = Some(tournament);
    report.set_ratings(ratings);
    report.portfolio = Some(portfolio);
    report.feedback = Some(feedback);
    info!(
        run_id = %report.run_id,
        approximate = report.ratings_approximate,
        warnings = report.warnings.len(),
        "pipeline complete"
    );
    Ok(report)
}
