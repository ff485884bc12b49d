//! Persisted run report and its markdown rendering.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::bradley_terry::{RatingReport, RatingState};
use crate::calibration::CalibrationReport;
use crate::feedback::FeedbackReport;
use crate::ledger::write_json_atomic;
use crate::portfolio::PortfolioSelection;
use crate::tournament::TournamentResult;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("report at {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Outputs of one pipeline run. Floats reload bit-identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub created_at: String,
    pub seed: u64,
    #[serde(default)]
    pub calibration: Option<CalibrationReport>,
    #[serde(default)]
    pub tournament: Option<TournamentResult>,
    #[serde(default)]
    pub ratings: Option<RatingReport>,
    #[serde(default)]
    pub portfolio: Option<PortfolioSelection>,
    #[serde(default)]
    pub feedback: Option<FeedbackReport>,
    pub ratings_approximate: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new(seed: u64) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now().to_rfc3339(),
            seed,
            calibration: None,
            tournament: None,
            ratings: None,
            portfolio: None,
            feedback: None,
            ratings_approximate: false,
            warnings: Vec::new(),
        }
    }

    pub fn rating_state(&self) -> Option<&RatingState> {
        self.ratings.as_ref().map(|r| &r.state)
    }

    /// Attach the ratings and carry their approximate flag and warnings up.
    pub fn set_ratings(&mut self, ratings: RatingReport) {
        self.ratings_approximate = ratings.meta.approximate;
        self.warnings.extend(ratings.warnings.iter().cloned());
        self.ratings = Some(ratings);
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let path = path.as_ref();
        write_json_atomic(path, self).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ReportError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Tournament Run Report\n\n");
        out.push_str(&format!("- Run id: `{}`\n", self.run_id));
        out.push_str(&format!("- Created: {}\n", self.created_at));
        out.push_str(&format!("- Seed: {}\n", self.seed));
        if self.ratings_approximate {
            out.push_str("- Ratings: **approximate** (estimator hit its iteration cap)\n");
        }
        out.push('\n');

        if let Some(cal) = &self.calibration {
            out.push_str("## Calibration\n\n");
            out.push_str("| judge | calls | accuracy | 95% CI | position bias | rho | confidence |\n");
            out.push_str("|---|---|---|---|---|---|---|\n");
            for j in cal.judges.values() {
                out.push_str(&format!(
                    "| {} | {} | {:.3} | [{:.3}, {:.3}] | {:+.3} | {:.3} | {} |\n",
                    j.judge,
                    j.total_calls,
                    j.accuracy,
                    j.accuracy_ci_lower,
                    j.accuracy_ci_upper,
                    j.position_bias,
                    j.rho,
                    j.confidence
                ));
            }
            if !cal.excluded.is_empty() {
                out.push_str(&format!("\nExcluded judges: {}\n", cal.excluded.join(", ")));
            }
            out.push('\n');
        }

        if let Some(t) = &self.tournament {
            out.push_str("## Tournament\n\n");
            out.push_str(&format!(
                "- Rounds: {}, judge calls: {}, estimated cost: {:.2}\n",
                t.rounds.len(),
                t.total_calls,
                t.estimated_cost
            ));
            out.push_str(&format!("- Valid verdicts: {}, dropped or replaced: {}\n\n", t.matches.len(), t.audit.len()));
            out.push_str("| round | field | panel | pairings | calls | dropped | rematches |\n");
            out.push_str("|---|---|---|---|---|---|---|\n");
            for r in &t.rounds {
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} | {} |\n",
                    r.round,
                    r.field_size,
                    r.panel_size,
                    r.pairings.len(),
                    r.judge_calls,
                    r.dropped_calls,
                    r.forced_rematches
                ));
            }
            out.push('\n');
        }

        if let Some(ratings) = &self.ratings {
            out.push_str("## Ratings\n\n");
            out.push_str("| rank | candidate | theta | 95% CI | matches | W-L |\n");
            out.push_str("|---|---|---|---|---|---|\n");
            for r in &ratings.ranked {
                out.push_str(&format!(
                    "| {} | {} | {:+.3} | [{:+.3}, {:+.3}] | {} | {}-{} |\n",
                    r.rank, r.id, r.theta, r.ci_lower, r.ci_upper, r.matches, r.wins, r.losses
                ));
            }
            if !ratings.insufficient.is_empty() {
                out.push_str("\nInsufficient evidence (not ranked):\n\n");
                for c in &ratings.insufficient {
                    out.push_str(&format!("- {}: {}\n", c.id, c.reason));
                }
            }
            out.push('\n');
        }

        if let Some(p) = &self.portfolio {
            out.push_str("## Portfolio\n\n");
            if let Some(top) = &p.top_1 {
                out.push_str(&format!("- Top 1: {} ({})\n", top.id, top.reason));
                if !top.co_leaders.is_empty() {
                    out.push_str(&format!("  - Co-leaders: {}\n", top.co_leaders.join(", ")));
                }
            }
            out.push_str(&format!("- Top 3: {}\n", p.top_3.join(", ")));
            out.push_str(&format!("- Top 5: {}\n", p.top_5.join(", ")));
            if !p.excluded.is_empty() {
                out.push_str("\nExcluded:\n\n");
                for e in &p.excluded {
                    out.push_str(&format!("- {} ({:?}): {}\n", e.id, e.reason, e.detail));
                }
            }
            out.push('\n');
        }

        if let Some(f) = &self.feedback {
            out.push_str("## Next-run channel weights\n\n");
            for (channel, w) in &f.next_weights {
                out.push_str(&format!("- {channel}: {w:.3}\n"));
            }
            out.push_str(&format!("\n{}\n\n", f.recommendation));
        }

        if !self.warnings.is_empty() {
            out.push_str("## Warnings\n\n");
            for w in &self.warnings {
                out.push_str(&format!("- {w}\n"));
            }
        }
        out
    }
}
