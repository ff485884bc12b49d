#![forbid(unsafe_code)]

//! # tournament-harness
//!
//! Rank a pool of research candidates by asking LLM judges pairwise questions.
//!
//! Judges are first calibrated on a tiered pack with known answers; each earns a
//! reliability weight `rho` and a position-bias prior. Candidates then meet in a
//! seeded Swiss tournament with escalating judge panels. A judge-weighted
//! Bradley–Terry fit with bootstrap intervals turns the verdict log into ratings,
//! a greedy redundancy-aware optimizer picks a portfolio, and a Thompson-sampling
//! ledger reweights the generation channels for the next run.

pub mod archive;
pub mod bradley_terry;
pub mod calibration;
pub mod channel;
pub mod concept_graph;
pub mod feedback;
pub mod gateway;
pub mod judge;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod portfolio;
pub mod report;
pub mod similarity;
pub mod tournament;
pub mod trace;

pub use archive::SqliteMatchArchive;
pub use bradley_terry::{rate, EstimatorConfig, RatingReport, RatingState};
pub use calibration::{run_calibration, CalibrationConfig, CalibrationReport, CalibrationStore};
pub use channel::{Channel, GenerationContext};
pub use concept_graph::{build_concept_graph, ConceptGraph, Document, GraphConfig};
pub use feedback::{run_feedback, FeedbackConfig, FeedbackReport};
pub use gateway::{ChatGateway, ProviderGateway};
pub use judge::{GatewayOracle, JudgeOracle, SimulatedOracle};
pub use ledger::{ChannelLedger, LedgerStore};
pub use model::{CalibrationItem, Candidate, Judge, MatchRecord, Tier};
pub use pipeline::{run_full, PipelineConfig, PipelineError, PipelineInputs, PipelineStores};
pub use portfolio::{optimize, PortfolioConfig, PortfolioSelection};
pub use report::RunReport;
pub use trace::{AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use tournament::{run_tournament, Schedule, TournamentConfig, TournamentResult};
